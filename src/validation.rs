//! Validation of addresses and identities supplied to tunnels and configs.
//!
//! Addresses follow the `host:port` family accepted by the SSH transport:
//! `host:port`, `host%zone:port`, `[host]:port` and `[host%zone]:port`.

/// Validation error with field context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Split an address into host and port.
///
/// The host keeps any `%zone` suffix; brackets around IPv6 literals are removed.
///
/// # Errors
///
/// Returns `ValidationError` if the port is missing or not a number in 1..=65535,
/// if the host is empty, or if an unbracketed host contains a colon.
pub fn split_host_port(addr: &str) -> Result<(String, u16), ValidationError> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let Some(end) = rest.find(']') else {
            return Err(ValidationError::new("address", format!("missing ']' in address {addr}")));
        };
        let host = &rest[..end];
        let Some(port) = rest[end + 1..].strip_prefix(':') else {
            return Err(ValidationError::new("address", format!("missing port in address {addr}")));
        };
        (host, port)
    } else {
        let Some((host, port)) = addr.rsplit_once(':') else {
            return Err(ValidationError::new("address", format!("missing port in address {addr}")));
        };
        if host.contains(':') {
            return Err(ValidationError::new("address", format!("too many colons in address {addr}")));
        }
        (host, port)
    };

    if host.trim().is_empty() {
        return Err(ValidationError::new("address", format!("missing host in address {addr}")));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("address", format!("invalid host in address {addr}")));
    }

    let port = validate_port(port)?;
    Ok((host.to_string(), port))
}

/// Validate a port number string.
///
/// # Errors
///
/// Returns `ValidationError` if the port is not a valid number in range 1-65535.
pub fn validate_port(port_str: &str) -> Result<u16, ValidationError> {
    let port_str = port_str.trim();

    if port_str.is_empty() {
        return Err(ValidationError::new("port", "Port is required"));
    }

    match port_str.parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        Ok(_) => Err(ValidationError::new("port", "Port must be between 1 and 65535")),
        Err(_) => Err(ValidationError::new(
            "port",
            format!("Invalid port number: '{}'", port_str),
        )),
    }
}

/// Validate the remote login name for an SSH session.
///
/// There is no "current user" fallback, so the name is required. Its
/// content is left to the server: numeric ids, `+` and `DOMAIN\user` forms
/// are all passed through as given.
///
/// # Errors
///
/// Returns `ValidationError` if the username is blank or has surrounding whitespace.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::new("username", "user not specified"));
    }

    if trimmed.len() != username.len() {
        return Err(ValidationError::new(
            "username",
            "user may not have leading or trailing whitespace",
        ));
    }

    Ok(())
}
