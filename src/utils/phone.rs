/// Normalizes a phone number to E.164 form: a leading `+` followed by digits.
///
/// Every character other than ASCII digits is dropped and a single `+` is
/// prepended, so the function is total and idempotent.
pub fn normalize(phone: &str) -> String {
    let mut normalized = String::with_capacity(phone.len() + 1);
    normalized.push('+');
    normalized.extend(phone.chars().filter(char::is_ascii_digit));
    normalized
}

/// True when `phone` has at least one digit once normalized.
pub fn has_digits(phone: &str) -> bool {
    phone.chars().any(|c| c.is_ascii_digit())
}

/// Plausible E.164: `+`, a non-zero leading digit, at most 15 digits in total.
pub fn is_valid_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (2..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}
