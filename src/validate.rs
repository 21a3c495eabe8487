//! Input validators. Each takes raw text and returns the accepted, typed
//! value or a human-readable rejection reason. Rejection is a normal return
//! path meant for re-prompting, never an error to propagate.

use crate::calc::{round_2, round_3};

pub fn validate_name(raw: &str) -> Result<String, String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err("Name cannot be empty".to_string());
    }
    if name.len() < 2 {
        return Err("Name must be at least 2 characters long".to_string());
    }
    if name.len() > 255 {
        return Err("Name cannot exceed 255 characters".to_string());
    }
    let allowed = |c: char| c.is_ascii_alphabetic() || matches!(c, ' ' | '-' | '\'' | '.');
    if !name.chars().all(allowed) {
        return Err(
            "Name can only contain letters, spaces, hyphens, apostrophes, and periods".to_string(),
        );
    }
    Ok(name.to_string())
}

/// Email is optional: empty input is accepted as the empty string.
pub fn validate_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Ok(String::new());
    }
    if is_rfc_lite_email(&email) {
        Ok(email)
    } else {
        Err("Invalid email format".to_string())
    }
}

// local@domain.tld with the original's permissive character classes.
fn is_rfc_lite_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-'));
    if !local_ok || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'));
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());
    host_ok && tld_ok
}

pub fn validate_year_level(raw: &str) -> Result<i64, String> {
    match raw.trim().parse::<i64>() {
        Ok(y) if (1..=4).contains(&y) => Ok(y),
        Ok(_) => Err("Year level must be between 1 and 4".to_string()),
        Err(_) => Err("Year level must be a whole number".to_string()),
    }
}

/// Scores are [0,100], rounded to 2 decimals on acceptance.
pub fn validate_score(raw: &str) -> Result<f64, String> {
    match raw.trim().parse::<f64>() {
        Ok(v) if (0.0..=100.0).contains(&v) => Ok(round_2(v)),
        Ok(_) => Err("Grade must be between 0 and 100".to_string()),
        Err(_) => Err("Grade must be numeric".to_string()),
    }
}

/// Fractional weights are [0,1], rounded to 3 decimals on acceptance.
pub fn validate_weight(raw: &str) -> Result<f64, String> {
    match raw.trim().parse::<f64>() {
        Ok(v) if (0.0..=1.0).contains(&v) => Ok(round_3(v)),
        Ok(_) => Err("Weight must be between 0 and 1".to_string()),
        Err(_) => Err("Weight must be numeric".to_string()),
    }
}

/// Public student ids are a fixed count of ASCII digits; the count is
/// workspace configuration (default 8).
pub fn validate_student_id(raw: &str, expected_len: usize) -> Result<String, String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err("Student ID cannot be empty".to_string());
    }
    if id.len() != expected_len || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Student ID must be exactly {} digits", expected_len));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_accepts_letters_and_punctuation() {
        assert_eq!(
            validate_name("  Mary-Jane O'Neil Jr. ").expect("valid"),
            "Mary-Jane O'Neil Jr."
        );
    }

    #[test]
    fn name_rejections() {
        assert!(validate_name("").is_err());
        assert!(validate_name("A").is_err());
        assert!(validate_name("R2D2").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn email_optional_and_lowercased() {
        assert_eq!(validate_email("").expect("valid"), "");
        assert_eq!(
            validate_email(" Jane.Doe+x@Example.EDU ").expect("valid"),
            "jane.doe+x@example.edu"
        );
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a@b.c").is_err());
        assert!(validate_email("@x.com").is_err());
    }

    #[test]
    fn year_level_set_membership() {
        assert_eq!(validate_year_level("3").expect("valid"), 3);
        assert!(validate_year_level("0").is_err());
        assert!(validate_year_level("5").is_err());
        assert!(validate_year_level("two").is_err());
    }

    #[test]
    fn score_range_and_rounding() {
        assert_eq!(validate_score("88.456").expect("valid"), 88.46);
        assert_eq!(validate_score("0").expect("valid"), 0.0);
        assert_eq!(validate_score("100").expect("valid"), 100.0);
        assert!(validate_score("100.01").is_err());
        assert!(validate_score("-1").is_err());
        assert!(validate_score("abc").is_err());
    }

    #[test]
    fn weight_range_and_rounding() {
        assert_eq!(validate_weight("0.3334").expect("valid"), 0.333);
        assert!(validate_weight("1.5").is_err());
        assert!(validate_weight("-0.1").is_err());
    }

    #[test]
    fn student_id_digit_count() {
        assert_eq!(validate_student_id("12345678", 8).expect("valid"), "12345678");
        assert!(validate_student_id("1234567", 8).is_err());
        assert!(validate_student_id("1234567a", 8).is_err());
        assert_eq!(validate_student_id("123456", 6).expect("valid"), "123456");
    }
}
