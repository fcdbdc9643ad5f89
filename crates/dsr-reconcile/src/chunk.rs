/// Split points tried in order; each is used only when its last occurrence
/// inside the window lies beyond 80% of the bound.
const BOUNDARIES: [char; 4] = ['\n', ',', ' ', '"'];

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Concatenating the chunks reproduces `text` exactly. A bound of zero returns
/// the text unsplit.
pub fn split_large_text(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if max_chars == 0 || chars.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        if chars.len() - start <= max_chars {
            chunks.push(chars[start..].iter().collect());
            break;
        }
        let window = &chars[start..start + max_chars];
        let split = split_point(window, max_chars);
        chunks.push(window[..split].iter().collect());
        start += split;
    }
    chunks
}

fn split_point(window: &[char], max_chars: usize) -> usize {
    for b in BOUNDARIES {
        if let Some(pos) = window.iter().rposition(|c| *c == b) {
            // pos > 0.8 * max, in integers
            if pos * 5 > max_chars * 4 {
                return pos + 1;
            }
        }
    }
    max_chars
}
