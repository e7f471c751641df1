//! Request extractors for caller identities and container context.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, OptionalFromRequest, Request};
use axum::http::header;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use previewd_common::{ContainerRoute, Identity, IdentitySet, PreviewError};

use super::api::SharedState;
use super::error::ApiError;
use crate::resolver::subdomain_from_host;

/// Header carrying every identity the caller holds, `id:secret[,id:secret...]`.
pub const IDENTITY_HEADER: &str = "x-previewd-users";

/// The verified identity set of the caller.
#[derive(Debug, Clone)]
pub struct Caller {
    /// The acting identity: first in the header.
    pub primary: Identity,
    pub identities: IdentitySet,
}

impl FromRequestParts<SharedState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(PreviewError::AuthenticationFailure)?;
        let identities = IdentitySet::parse(raw)?;
        state.gate.verify_all(&identities).await?;
        let primary = identities
            .primary()
            .cloned()
            .ok_or(PreviewError::AuthenticationFailure)?;
        Ok(Self {
            primary,
            identities,
        })
    }
}

/// The container addressed by the request's Host subdomain.
#[derive(Debug, Clone)]
pub struct ContainerContext {
    pub subdomain: String,
    pub route: ContainerRoute,
}

impl ContainerContext {
    pub fn container_id(&self) -> &str {
        &self.route.container_id
    }
}

impl FromRequestParts<SharedState> for ContainerContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let subdomain = subdomain_from_host(host, &state.base_domain)
            .ok_or_else(|| PreviewError::not_found("subdomain", host))?;
        let route = state.resolver.resolve(&subdomain).await?;
        Ok(Self { subdomain, route })
    }
}

/// `Json` body whose rejections render as `BadRequest` like every other
/// caller error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

fn malformed_body(rejection: JsonRejection) -> ApiError {
    PreviewError::bad_request(rejection.body_text()).into()
}

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = <Json<T> as FromRequest<S>>::from_request(req, state)
            .await
            .map_err(malformed_body)?;
        Ok(Self(value))
    }
}

impl<T, S> OptionalFromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let body = <Json<T> as OptionalFromRequest<S>>::from_request(req, state)
            .await
            .map_err(malformed_body)?;
        Ok(body.map(|Json(value)| Self(value)))
    }
}
