//! Keycloak Admin REST helpers
//!
//! Every call uses the access token stored in the session. Without one the
//! call returns an empty list and never touches the network. Transport
//! errors and non-2xx answers are raised as [`Error::Admin`].

use reqwest::{Method, StatusCode, header::ACCEPT};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::service::KeycloakService;
use crate::{Error, Result};

/// Role representation as exchanged with the role-mapping endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleRepresentation {
    /// Role id; Keycloak requires it when granting or revoking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Role name
    pub name: String,
    /// Remaining fields (`description`, `composite`, `clientRole`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoleRepresentation {
    /// Role with the given id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// Query parameters passed through to Keycloak, e.g. `[("search", "alice")]`
pub type AdminQuery<'a> = &'a [(&'a str, &'a str)];

impl KeycloakService {
    /// `GET /users`
    pub async fn list_users(&self, query: AdminQuery<'_>) -> Result<Vec<Value>> {
        self.admin_call("load users", Method::GET, "users", query, None)
            .await
    }

    /// `GET /clients`
    pub async fn list_clients(&self, query: AdminQuery<'_>) -> Result<Vec<Value>> {
        self.admin_call("load clients", Method::GET, "clients", query, None)
            .await
    }

    /// `GET /clients/{id}/roles`; `id` is the client's internal id
    pub async fn list_client_roles(
        &self,
        id: &str,
        query: AdminQuery<'_>,
    ) -> Result<Vec<RoleRepresentation>> {
        let path = format!("clients/{id}/roles");
        self.admin_call("load client roles", Method::GET, &path, query, None)
            .await
    }

    /// `GET /clients/{id}/authz/resource-server/resource`
    pub async fn list_client_resources(&self, id: &str) -> Result<Vec<Value>> {
        let path = format!("clients/{id}/authz/resource-server/resource");
        self.admin_call("load client resources", Method::GET, &path, &[], None)
            .await
    }

    /// `GET /users/{user_id}/role-mappings/clients/{client}`
    pub async fn user_client_roles(
        &self,
        user_id: &str,
        client: Option<&str>,
    ) -> Result<Vec<RoleRepresentation>> {
        let path = self.role_mapping_path(user_id, client);
        self.admin_call("load user client roles", Method::GET, &path, &[], None)
            .await
    }

    /// `POST /users/{user_id}/role-mappings/clients/{client}`
    pub async fn grant_client_roles(
        &self,
        user_id: &str,
        roles: &[RoleRepresentation],
        client: Option<&str>,
    ) -> Result<Vec<Value>> {
        let path = self.role_mapping_path(user_id, client);
        self.admin_call(
            "add client roles to user",
            Method::POST,
            &path,
            &[],
            Some(roles),
        )
        .await
    }

    /// `DELETE /users/{user_id}/role-mappings/clients/{client}`
    pub async fn revoke_client_roles(
        &self,
        user_id: &str,
        roles: &[RoleRepresentation],
        client: Option<&str>,
    ) -> Result<Vec<Value>> {
        let path = self.role_mapping_path(user_id, client);
        self.admin_call(
            "remove client roles from user",
            Method::DELETE,
            &path,
            &[],
            Some(roles),
        )
        .await
    }

    /// Base of the admin surface for the configured realm
    pub fn admin_url(&self) -> String {
        format!(
            "{}/admin/realms/{}",
            self.config().base_url(),
            self.config().realm
        )
    }

    fn role_mapping_path(&self, user_id: &str, client: Option<&str>) -> String {
        let client = client.unwrap_or(self.config().client_id.as_str());
        format!("users/{user_id}/role-mappings/clients/{client}")
    }

    async fn admin_call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        query: AdminQuery<'_>,
        roles: Option<&[RoleRepresentation]>,
    ) -> Result<Vec<T>> {
        let Some(token) = self.stored_access() else {
            debug!(operation, "No stored access token, skipping admin call");
            return Ok(Vec::new());
        };
        let access_token = token.access_token().unwrap_or_default();

        let url = format!("{}/{path}", self.admin_url());
        let mut request = self
            .http_client()
            .request(method, &url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(roles) = roles {
            request = request.json(roles);
        }

        let response = request.send().await.map_err(|e| {
            error!(operation, error = %e, "[Keycloak Service] admin request failed");
            Error::admin(operation, e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(operation, status = %status, "[Keycloak Service] admin request rejected");
            return Err(Error::admin(operation, format!("HTTP {status} - {body}")));
        }
        if status != StatusCode::OK {
            return Ok(Vec::new());
        }

        response
            .json()
            .await
            .map_err(|e| Error::admin(operation, format!("invalid response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_keeps_unknown_fields() {
        let role: RoleRepresentation = serde_json::from_value(json!({
            "id": "r1",
            "name": "manage-account",
            "composite": false,
            "clientRole": true
        }))
        .unwrap();

        assert_eq!(role.id.as_deref(), Some("r1"));
        assert_eq!(role.extra.get("clientRole"), Some(&json!(true)));
        assert_eq!(serde_json::to_value(&role).unwrap()["composite"], json!(false));
    }

    #[test]
    fn role_without_id_omits_it() {
        let role = RoleRepresentation {
            name: "viewer".to_string(),
            ..RoleRepresentation::default()
        };
        assert_eq!(serde_json::to_value(&role).unwrap(), json!({"name": "viewer"}));
    }
}
