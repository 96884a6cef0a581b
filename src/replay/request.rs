//! Request lines fed to the replay harness.

use crate::error::{Result, TurnstileError};

/// The context of one replayed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub client_ip: String,
    /// Upper-cased HTTP verb
    pub verb: String,
    /// Route without a query string
    pub resource: String,
    /// Authorization header value, empty if none
    pub user_auth: String,
}

impl RequestContext {
    /// Parse `<client-ip> <VERB> <resource> [authorization...]`.
    ///
    /// Everything after the resource is taken as the authorization value, so
    /// `Basic <credentials>` survives intact.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();

        let (Some(client_ip), Some(verb), Some(resource)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(TurnstileError::InvalidRequest(format!(
                "expected `<client-ip> <VERB> <resource> [authorization]`, got {:?}",
                line
            )));
        };

        let resource = resource.split('?').next().unwrap_or_default();
        if resource.is_empty() {
            return Err(TurnstileError::InvalidRequest(format!(
                "empty resource in {:?}",
                line
            )));
        }

        Ok(Self {
            client_ip: client_ip.to_string(),
            verb: verb.to_ascii_uppercase(),
            resource: resource.to_string(),
            user_auth: tokens.collect::<Vec<_>>().join(" "),
        })
    }
}
