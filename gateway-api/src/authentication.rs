use actix_web::{Error, dev::ServiceRequest, web::Data};
use actix_web_httpauth::extractors::{
    AuthenticationError,
    basic::{BasicAuth, Config},
};
use constant_time_eq::constant_time_eq;
use secrecy::ExposeSecret;

use crate::config::ApiConfig;

/// Accepts requests carrying the configured basic auth user.
pub async fn auth_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let config = req
        .app_data::<Config>()
        .cloned()
        .unwrap_or_default()
        .realm("apis");

    let Some(api_config) = req.app_data::<Data<ApiConfig>>() else {
        return Err((AuthenticationError::from(config).into(), req));
    };
    let basic_auth = &api_config.basic_auth;

    let password = credentials.password().unwrap_or_default();
    let username_matches =
        constant_time_eq(basic_auth.username.as_bytes(), credentials.user_id().as_bytes());
    let password_matches = constant_time_eq(
        basic_auth.password.expose_secret().as_bytes(),
        password.as_bytes(),
    );

    if !(username_matches && password_matches) {
        return Err((AuthenticationError::from(config).into(), req));
    }

    Ok(req)
}
