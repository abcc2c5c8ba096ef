//! Shared fixtures for integration tests

#![allow(dead_code)]

use axum::http::StatusCode;
use axum_test::TestServer;
use std::sync::Arc;
use uuid::Uuid;

use idgate::artifacts::{ArtifactAssociator, NoopAssociator};
use idgate::config::IdgateConfig;
use idgate::identity::MemoryIdentityStore;
use idgate::oauth2::{OAuthProvider, ProviderProfile, ProviderRegistry};
use idgate::state::IdgateState;
use idgate::whitelist::MemoryWhitelistStore;

pub use idgate::testing::StaticProvider;

pub const FRONTEND: &str = "https://app.example.com";

/// Result of a completed browser round trip
pub struct Landing {
    /// Full redirect location
    pub location: url::Url,
}

impl Landing {
    pub fn param(&self, name: &str) -> Option<String> {
        self.location
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Parsed `user` payload of a success redirect
    pub fn user(&self) -> serde_json::Value {
        serde_json::from_str(&self.param("user").expect("user param")).expect("user json")
    }

    /// Session token from the payload
    pub fn session(&self) -> String {
        self.user()["token"].as_str().expect("token").to_string()
    }

    pub fn user_id(&self) -> Uuid {
        self.user()["id"].as_str().expect("id").parse().expect("uuid")
    }

    pub fn is_error(&self) -> bool {
        self.location.path() == "/auth/error"
    }
}

pub struct Gateway {
    pub server: TestServer,
    pub state: IdgateState,
    pub users: MemoryIdentityStore,
}

impl Gateway {
    pub fn new(providers: Vec<StaticProvider>) -> Self {
        Self::with_associator(providers, Arc::new(NoopAssociator))
    }

    pub fn with_associator(
        providers: Vec<StaticProvider>,
        associator: Arc<dyn ArtifactAssociator>,
    ) -> Self {
        let mut config = IdgateConfig::default();
        config.tokens.secret = "integration-secret".to_string();
        config.frontend.default_origin = FRONTEND.to_string();

        let registry = providers
            .into_iter()
            .fold(ProviderRegistry::new(), |registry, provider| {
                registry.with_provider(Arc::new(provider))
            });
        let users = MemoryIdentityStore::new();
        let state = IdgateState::with_stores(
            config,
            Arc::new(users.clone()),
            Arc::new(MemoryWhitelistStore::new()),
            registry,
            associator,
        )
        .expect("state");
        let server = TestServer::new(idgate::handlers::router(state.clone())).expect("server");

        Self {
            server,
            state,
            users,
        }
    }

    /// Fetch an authorization URL and return its raw `state` parameter
    pub async fn begin(
        &self,
        provider: &str,
        query: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> String {
        let mut request = self.server.get(&format!("/auth/{provider}/url"));
        for (key, value) in query {
            request = request.add_query_param(key, value);
        }
        if let Some(token) = bearer {
            request = request.authorization_bearer(token);
        }
        let response = request.await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        let auth_url = url::Url::parse(body["authUrl"].as_str().expect("authUrl")).expect("url");
        auth_url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("state param")
    }

    /// Deliver the provider callback and capture the redirect
    pub async fn finish(&self, provider: &str, code: &str, state: &str) -> Landing {
        let response = self
            .server
            .get(&format!("/auth/{provider}/callback"))
            .add_query_param("code", code)
            .add_query_param("state", state)
            .await;
        response.assert_status(StatusCode::SEE_OTHER);

        let location = response.header("location");
        Landing {
            location: url::Url::parse(location.to_str().expect("ascii")).expect("location url"),
        }
    }

    /// Fresh sign-in in one step
    pub async fn sign_in(&self, provider: &str, code: &str) -> Landing {
        let state = self.begin(provider, &[], None).await;
        self.finish(provider, code, &state).await
    }

    /// Link a provider to the signed-in user holding `session`
    pub async fn link(&self, provider: &str, code: &str, user_id: Uuid, session: &str) -> Landing {
        let user_id = user_id.to_string();
        let state = self
            .begin(provider, &[("userId", user_id.as_str())], Some(session))
            .await;
        self.finish(provider, code, &state).await
    }
}

pub fn github(id: &str, login: &str, email: &str) -> ProviderProfile {
    ProviderProfile::new(OAuthProvider::GitHub, id)
        .with_username(login)
        .with_email(email)
}

pub fn google(id: &str, email: &str, name: &str) -> ProviderProfile {
    ProviderProfile::new(OAuthProvider::Google, id)
        .with_email(email)
        .with_name(name)
}
