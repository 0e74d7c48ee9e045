pub mod correct;
pub mod transcribe;

pub use correct::correct;
pub use transcribe::transcribe;

use crate::error::AppError;
use actix_web::web;

/// Request bodies up to 50 MiB (a few minutes of 16 kHz audio in base64),
/// with parse failures rendered as the standard 400 error body.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(50 * 1024 * 1024)
        .error_handler(|err, _req| {
            AppError::BadRequest(format!("invalid JSON body: {}", err)).into()
        })
}
