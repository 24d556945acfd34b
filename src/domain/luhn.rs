/// Returns `true` when `number` is a non-empty string of ASCII digits that
/// passes the Luhn check-digit algorithm.
///
/// Every second digit counting from the right is doubled, with 9 subtracted
/// from any doubled value above 9. The number is valid when the digit sum is
/// divisible by 10.
pub fn validate(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let parity = number.len() % 2;
    let sum: u32 = number
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == parity {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();

    sum % 10 == 0
}

/// Computes the digit that makes `payload` followed by it pass [`validate`].
///
/// Returns `None` when `payload` contains anything other than ASCII digits.
pub fn check_digit(payload: &str) -> Option<u8> {
    if !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    (0u8..=9).find(|digit| validate(&format!("{payload}{digit}")))
}
