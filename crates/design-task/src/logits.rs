//! Mapping between integer token designs and continuous logits.
//!
//! A token in a vocabulary of size `V` becomes `V - 1` logits: the one-hot
//! vector is interpolated toward uniform, log-transformed, and expressed
//! relative to category 0. Decoding takes the argmax over `[0, logits...]`.

use crate::types::{DesignBatch, TaskError};

/// Weight on the one-hot vector when interpolating toward uniform.
pub const DEFAULT_SOFT_INTERPOLATION: f32 = 0.6;

/// Map token designs of shape `(n, L)` to logits of shape `(n, L, V - 1)`.
pub fn to_logits(
    tokens: &DesignBatch,
    vocab_size: usize,
    soft_interpolation: f32,
) -> Result<DesignBatch, TaskError> {
    let n = tokens.len();
    let seq_len = tokens.row_len();
    let channels = vocab_size.saturating_sub(1);

    let uniform = (1.0 - soft_interpolation) / vocab_size as f32;
    let hot = (soft_interpolation + uniform).ln();
    let cold = uniform.ln();

    let mut values = Vec::with_capacity(n * seq_len * channels);
    for &token in tokens.values() {
        let idx = token_index(token, vocab_size)?;
        let base = if idx == 0 { hot } else { cold };
        for c in 1..vocab_size {
            let v = if c == idx { hot } else { cold };
            values.push(v - base);
        }
    }

    DesignBatch::new(values, vec![n, seq_len, channels])
}

/// Decode logits of shape `(n, L, V - 1)` back to tokens of shape `(n, L)`.
pub fn to_tokens(logits: &DesignBatch) -> Result<DesignBatch, TaskError> {
    let shape = logits.shape();
    if shape.len() != 3 {
        return Err(TaskError::ShapeMismatch {
            shape: shape.to_vec(),
            len: logits.values().len(),
        });
    }
    let (n, seq_len, channels) = (shape[0], shape[1], shape[2]);

    let mut tokens = Vec::with_capacity(n * seq_len);
    for position in logits.values().chunks(channels.max(1)) {
        // Category 0 has an implicit logit of 0.
        let mut best = 0usize;
        let mut best_val = 0.0f32;
        for (c, &v) in position.iter().enumerate() {
            if v > best_val {
                best = c + 1;
                best_val = v;
            }
        }
        tokens.push(best as f32);
    }

    DesignBatch::new(tokens, vec![n, seq_len])
}

fn token_index(token: f32, vocab_size: usize) -> Result<usize, TaskError> {
    if token < 0.0 || token.fract() != 0.0 || token as usize >= vocab_size {
        return Err(TaskError::TokenOutOfRange { token, vocab_size });
    }
    Ok(token as usize)
}
