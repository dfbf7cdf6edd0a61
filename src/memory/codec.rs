//! Text encoding for the legacy on-disk pattern memory format.
//!
//! One pattern line looks like `v1 v2{}high{}low`: the K close-to-open
//! deltas space-separated, then the literal two-character separator `{}`,
//! then the predicted high diff, then `{}` again, then the predicted low
//! diff. Patterns are joined with `~`; blank entries are skipped.

use tracing::warn;

use super::PATTERN_LENGTH;

const FIELD_SEPARATOR: &str = "{}";

pub fn encode_patterns(patterns: &[[f64; PATTERN_LENGTH]], highs: &[f64], lows: &[f64]) -> String {
    patterns
        .iter()
        .zip(highs.iter())
        .zip(lows.iter())
        .map(|((pattern, h), l)| {
            let deltas = pattern
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            format!("{}{}{}{}{}", deltas, FIELD_SEPARATOR, h, FIELD_SEPARATOR, l)
        })
        .collect::<Vec<_>>()
        .join("~")
}

pub fn decode_patterns(text: &str) -> (Vec<[f64; PATTERN_LENGTH]>, Vec<f64>, Vec<f64>) {
    let mut patterns = Vec::new();
    let mut highs = Vec::new();
    let mut lows = Vec::new();

    for entry in text.split('~') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match decode_one_pattern(entry) {
            Some((pattern, h, l)) => {
                patterns.push(pattern);
                highs.push(h);
                lows.push(l);
            }
            None => {
                warn!(entry, "skipping corrupt pattern memory entry");
            }
        }
    }

    (patterns, highs, lows)
}

fn decode_one_pattern(entry: &str) -> Option<([f64; PATTERN_LENGTH], f64, f64)> {
    let (deltas_part, rest) = entry.split_once(FIELD_SEPARATOR)?;
    let (h_part, l_part) = rest.split_once(FIELD_SEPARATOR)?;

    let deltas: Vec<f64> = deltas_part
        .split_whitespace()
        .map(|v| v.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if deltas.len() != PATTERN_LENGTH {
        return None;
    }

    let h: f64 = h_part.parse().ok()?;
    let l: f64 = l_part.parse().ok()?;

    let mut pattern = [0.0; PATTERN_LENGTH];
    pattern.copy_from_slice(&deltas);
    Some((pattern, h, l))
}

pub fn encode_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn decode_floats(text: &str) -> Vec<f64> {
    text.split_whitespace()
        .filter_map(|tok| match tok.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(token = tok, "skipping unparseable weight token");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_pins_the_mandated_on_disk_format() {
        let patterns = vec![[1.5, -2.25]];
        let highs = vec![0.02];
        let lows = vec![-0.015];
        let text = encode_patterns(&patterns, &highs, &lows);
        assert_eq!(text, "1.5 -2.25{}0.02{}-0.015");
    }

    #[test]
    fn encode_then_decode_preserves_values() {
        let patterns = vec![[1.5, -2.25], [0.0, 0.0]];
        let highs = vec![0.02, -0.01];
        let lows = vec![-0.015, 0.005];
        let text = encode_patterns(&patterns, &highs, &lows);
        let (p2, h2, l2) = decode_patterns(&text);
        assert_eq!(p2, patterns);
        assert_eq!(h2, highs);
        assert_eq!(l2, lows);
    }

    #[test]
    fn decode_skips_entries_with_wrong_arity() {
        let text = "1.0{}0.1{}-0.1~1.0 2.0 3.0{}0.1{}-0.1~1.0 2.0{}0.1{}-0.1";
        let (patterns, _, _) = decode_patterns(text);
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn decode_floats_skips_garbage_tokens() {
        let vals = decode_floats("1.0 garbage 2.5");
        assert_eq!(vals, vec![1.0, 2.5]);
    }
}
