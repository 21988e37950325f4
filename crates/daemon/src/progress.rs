/// Extract a progress percentage from a chunk of transcoder output.
///
/// The marker is a run of digits wrapped in `(` and `%)`, as in
/// `time=00:00:05 (34%)`. When a chunk carries several markers the last
/// one wins (it is the freshest figure). Returns `None` when no
/// well-formed marker is present; malformed markers are not an error.
pub fn extract_percent(text: &str) -> Option<u32> {
    let mut percent = None;
    for (open, _) in text.match_indices('(') {
        let rest = &text[open + 1..];
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 || !rest[digits..].starts_with("%)") {
            continue;
        }
        if let Ok(value) = rest[..digits].parse::<u32>() {
            percent = Some(value);
        }
    }
    percent
}
