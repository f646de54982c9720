use serde::Deserialize;

use crate::sandbox::SandboxError;

/// Commit identity derived from the source-control user-info response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl GitIdentity {
    /// Parse `GET /user`. Missing fields fall back to the login and a
    /// synthesized no-reply address; only malformed JSON is an error.
    pub fn from_user_json(body: &str) -> Result<Self, SandboxError> {
        let user: GithubUser = serde_json::from_str(body)
            .map_err(|e| SandboxError::Serde(format!("failed to parse user info: {e}")))?;

        let login = non_empty(user.login).unwrap_or_else(|| "github-user".to_string());
        let email = non_empty(user.email)
            .unwrap_or_else(|| format!("{login}@users.noreply.github.com"));
        let name = non_empty(user.name).unwrap_or_else(|| login.clone());

        Ok(Self { name, email })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_profile_fields_when_present() {
        let id = GitIdentity::from_user_json(
            r#"{"login":"octocat","name":"The Octocat","email":"octo@example.com"}"#,
        )
        .unwrap();
        assert_eq!(id.name, "The Octocat");
        assert_eq!(id.email, "octo@example.com");
    }

    #[test]
    fn missing_email_synthesizes_noreply() {
        let id =
            GitIdentity::from_user_json(r#"{"login":"octocat","name":null,"email":null}"#).unwrap();
        assert_eq!(id.name, "octocat");
        assert_eq!(id.email, "octocat@users.noreply.github.com");
    }

    #[test]
    fn error_payload_falls_back_to_placeholder_login() {
        let id = GitIdentity::from_user_json(r#"{"message":"Bad credentials"}"#).unwrap();
        assert_eq!(id.name, "github-user");
        assert_eq!(id.email, "github-user@users.noreply.github.com");
    }

    #[test]
    fn malformed_body_is_an_error() {
        let err = GitIdentity::from_user_json("<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, SandboxError::Serde(_)));
    }
}
