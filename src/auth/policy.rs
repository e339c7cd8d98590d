/// Symbols that satisfy the "special character" rule.
pub const PASSWORD_SYMBOLS: &str = "!@#$%^&*(),.?\":{}|<>";

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 20;

pub const PASSWORD_RULES: &str = "Password must be between 8 to 20 characters including at least one uppercase, lowercase, number, and special character";

/// Pass/fail password strength check.
///
/// Length is counted in characters, not bytes.
pub fn validate(password: &str) -> bool {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return false;
    }
    let mut upper = false;
    let mut lower = false;
    let mut digit = false;
    let mut symbol = false;
    for c in password.chars() {
        upper |= c.is_ascii_uppercase();
        lower |= c.is_ascii_lowercase();
        digit |= c.is_ascii_digit();
        symbol |= PASSWORD_SYMBOLS.contains(c);
    }
    upper && lower && digit && symbol
}
