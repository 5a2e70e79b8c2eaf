//! Error taxonomy shared by the journal services and the HTTP layer.
//!
//! Storage and configuration code works with `anyhow`; anything that reaches a
//! request handler is converted into an [`AppError`], which knows how to turn
//! itself into a response.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use thiserror::Error;
use tracing::error;

use crate::html;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed date segment or calendar query parameters
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Unknown entry, or an edit requested at a stale date segment
    #[error("Not found: {0}")]
    NotFound(String),

    /// The signed-in user does not own the entry
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Missing or invalid form input
    #[error("{0}")]
    Validation(String),

    /// No session on a route that needs one
    #[error("Authentication required")]
    AuthRequired,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidDate(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AuthRequired => StatusCode::SEE_OTHER,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the user
    fn public_message(&self) -> String {
        match self {
            AppError::InvalidDate(_) | AppError::NotFound(_) => "Page not found.".to_string(),
            AppError::Forbidden(_) => "You do not have access to this entry.".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::AuthRequired => "Please log in.".to_string(),
            AppError::Internal(_) => "Something went wrong.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::AuthRequired => Redirect::to("/login").into_response(),
            AppError::Internal(ref e) => {
                error!(error = %e, "Request failed");
                let markup = html::render_error(self.status(), &self.public_message());
                (self.status(), Html(markup.into_string())).into_response()
            }
            _ => {
                let markup = html::render_error(self.status(), &self.public_message());
                (self.status(), Html(markup.into_string())).into_response()
            }
        }
    }
}
