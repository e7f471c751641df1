//! Input validation and id generation.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::PreviewError;

static INSTANCE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9](-?[a-zA-Z0-9])*$").expect("valid regex"));

static ORDER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("valid regex"));

pub const INSTANCE_NAME_MIN: usize = 3;
pub const INSTANCE_NAME_MAX: usize = 20;

/// Validate a desired instance name: alphanumerics with internal single hyphens,
/// 3 to 20 characters.
pub fn validate_instance_name(name: &str) -> Result<(), PreviewError> {
    let len = name.chars().count();
    if !(INSTANCE_NAME_MIN..=INSTANCE_NAME_MAX).contains(&len) {
        return Err(PreviewError::bad_request(format!(
            "Instance name must be {}-{} characters",
            INSTANCE_NAME_MIN, INSTANCE_NAME_MAX
        )));
    }
    if !INSTANCE_NAME.is_match(name) {
        return Err(PreviewError::bad_request(
            "Instance name may only contain letters, digits and internal hyphens",
        ));
    }
    Ok(())
}

/// Validate every id of a question ordering before anything is written.
pub fn validate_order_ids<S: AsRef<str>>(ids: &[S]) -> Result<(), PreviewError> {
    if ids.iter().all(|id| ORDER_ID.is_match(id.as_ref())) {
        Ok(())
    } else {
        Err(PreviewError::bad_request("Bad order format"))
    }
}

/// Validate a container port.
pub fn validate_port(port: u32) -> Result<u16, PreviewError> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| PreviewError::bad_request(format!("Invalid port {}", port)))
}

fn random_hex(len: usize) -> String {
    let mut out = String::with_capacity(len + 32);
    while out.len() < len {
        out.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    out.truncate(len);
    out
}

/// Short entity id: 8 lowercase hex characters.
pub fn new_id() -> String {
    random_hex(8)
}

/// Identity secret: 30 lowercase hex characters.
pub fn new_secret() -> String {
    random_hex(30)
}
