//! OpenID Connect client for Keycloak
//!
//! Discovery, URL building, token grants, claim validation and the admin
//! REST helpers.

pub mod admin;
pub mod discovery;
pub mod outcome;
pub mod service;
pub mod token;
pub mod url;

pub use admin::{AdminQuery, RoleRepresentation};
pub use discovery::{DiscoveryResolver, ProviderMetadata};
pub use outcome::Recovered;
pub use service::{KeycloakService, KeycloakServiceBuilder, UserProfile, new_state};
pub use token::{Audience, ExpectedClaims, IdTokenClaims, TokenSet, parse_claims_unverified};
pub use url::build_url;
