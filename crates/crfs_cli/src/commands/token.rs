//! Token command implementation.

use crfs_protocol::{FileSystemId, UserId};
use crfs_server::{AuthConfig, TokenVerifier};

/// Runs the token command, printing a hex token.
pub fn run(user: &str, fs: &str, secret: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", issue(user, fs, secret)?);
    Ok(())
}

fn issue(user: &str, fs: &str, secret: &str) -> Result<String, Box<dyn std::error::Error>> {
    let user: UserId = user.parse().map_err(|e| format!("user id: {e}"))?;
    let fs: FileSystemId = fs.parse().map_err(|e| format!("filesystem id: {e}"))?;
    let secret = hex::decode(secret.trim()).map_err(|e| format!("auth secret: {e}"))?;

    let token = TokenVerifier::new(AuthConfig::new(secret)).create_token(user, fs)?;
    Ok(hex::encode(token))
}
