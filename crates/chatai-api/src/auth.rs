use axum::{Json, extract::State, response::IntoResponse};
use tracing::{info, warn};
use uuid::Uuid;

use chatai_types::api::{
    InitiateSigninRequest, InitiateSigninResponse, SigninRequest, SigninResponse,
};

use crate::error::{ApiError, blocking};
use crate::extract::ValidJson;
use crate::middleware::create_token;
use crate::state::AppState;
use crate::totp::Totp;
use crate::validate::check_email;

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// POST /auth/initiate_signin — register the email if needed and issue a
/// passcode for it. The passcode is logged in place of being mailed.
pub async fn initiate_signin(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<InitiateSigninRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_email(&req.email)?;

    let db = state.clone();
    let email = req.email.clone();
    let new_id = Uuid::new_v4().to_string();
    let (user, created) = blocking(move || db.db.get_or_create_user(&new_id, &email)).await?;

    if created {
        info!("Created user {} for {}", user.id, user.email);
    }

    let otp = Totp::for_email(&req.email, &state.auth.jwt_secret).generate(unix_now())?;
    info!("Sign-in passcode for {}: {} (valid until {})", req.email, otp.code, otp.expires_at);

    let response = if state.auth.expose_otp {
        InitiateSigninResponse {
            message: format!("The otp to login is : {}", otp.code),
            otp: Some(otp.code),
            success: true,
        }
    } else {
        InitiateSigninResponse {
            otp: None,
            message: "OTP sent".to_string(),
            success: true,
        }
    };

    Ok(Json(response))
}

/// POST /auth/signin — trade a valid passcode for a bearer token.
pub async fn signin(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<SigninRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_email(&req.email)?;

    let db = state.clone();
    let email = req.email.clone();
    let Some(user) = blocking(move || db.db.get_user_by_email(&email)).await? else {
        return Ok(Json(SigninResponse::rejected("The user is not found in the database")));
    };

    let totp = Totp::for_email(&req.email, &state.auth.jwt_secret);
    if !totp.verify(&req.otp, unix_now())? {
        warn!("Invalid passcode for {}", req.email);
        return Ok(Json(SigninResponse::rejected("Invalid otp")));
    }

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("Corrupt user id '{}': {}", user.id, e))?;
    let token = create_token(&state.auth, user_id, &user.email)?;

    info!("{} signed in", user.email);
    Ok(Json(SigninResponse::granted(token, user_id, user.email)))
}
