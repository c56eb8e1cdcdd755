use crate::engine::model::{ScoreGrads, Scores};

/// MatchSum ranking loss.
///
/// Candidates arrive best first. For every rank gap `i`, a candidate must
/// outscore the one `i` places below it by `margin * i`; every candidate must
/// also score at most the reference summary. Each group of hinge terms is
/// averaged over its pairs and the groups are summed.
#[derive(Debug, Clone, Copy)]
pub struct MarginRankingLoss {
    margin: f32,
}

impl MarginRankingLoss {
    #[must_use]
    pub fn new(margin: f64) -> Self {
        Self { margin: margin as f32 }
    }

    /// Loss value and its gradient with respect to every score.
    #[must_use]
    pub fn compute(&self, scores: &Scores) -> (f32, ScoreGrads) {
        let s = &scores.candidates;
        let n = s.len();
        let mut loss = 0.0f32;
        let mut grads = ScoreGrads { summary: 0.0, candidates: vec![0.0; n] };

        for gap in 1..n {
            let pairs = n - gap;
            let weight = 1.0 / pairs as f32;
            let margin = self.margin * gap as f32;
            for j in 0..pairs {
                let hinge = s[j + gap] - s[j] + margin;
                if hinge > 0.0 {
                    loss += hinge * weight;
                    grads.candidates[j + gap] += weight;
                    grads.candidates[j] -= weight;
                }
            }
        }

        if n > 0 {
            let weight = 1.0 / n as f32;
            for (j, score) in s.iter().enumerate() {
                let hinge = score - scores.summary;
                if hinge > 0.0 {
                    loss += hinge * weight;
                    grads.candidates[j] += weight;
                    grads.summary -= weight;
                }
            }
        }

        (loss, grads)
    }
}
