/// Caller identity
///
/// The identity collaborator resolves authentication upstream and hands
/// this service only the caller's internal user id, carried in a
/// header. No other identity logic lives here.
use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's internal user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity(pub Uuid);

impl FromRequest for Identity {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let identity = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .map(Identity)
            .ok_or_else(|| {
                AppError::Unauthorized(format!("missing or invalid {} header", USER_ID_HEADER))
            });
        ready(identity)
    }
}
