use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run: String },
    Message { message: String },
    Step { epoch: u32, step: u64, loss: f32 },
    Validation { epoch: u32, step: u64, indicator: Option<f64>, is_better: bool },
    EpochEnd { epoch: u32 },
    Finished { step: u64 },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run } => println!("[{run}] started"),
            ProgressEvent::Message { message } => println!("[matchsum] {message}"),
            ProgressEvent::Step { epoch, step, loss } => {
                println!("[matchsum] epoch {epoch} step {step} loss {loss:.6}");
            }
            ProgressEvent::Validation { epoch, step, indicator, is_better } => {
                let marker = if is_better { " (best)" } else { "" };
                match indicator {
                    Some(value) => println!("[matchsum] epoch {epoch} step {step} dev {value:.6}{marker}"),
                    None => println!("[matchsum] epoch {epoch} step {step} dev n/a"),
                }
            }
            ProgressEvent::EpochEnd { epoch } => println!("[matchsum] epoch {epoch} done"),
            ProgressEvent::Finished { step } => println!("[matchsum] finished after {step} steps"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged_snake_case() {
        let json = serde_json::to_value(ProgressEvent::EpochEnd { epoch: 2 }).unwrap();
        assert_eq!(json["type"], "epoch_end");
        assert_eq!(json["epoch"], 2);
    }
}
