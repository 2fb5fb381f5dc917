//! # REST
//!
//! The JSON error envelope returned by HTTP handlers built on the
//! application services.
//!
//! ```ignore
//! use trade_accounts::api::rest::ApiError;
//!
//! async fn get_binding(
//!     State(svc): State<ExchangeBindingService>,
//!     Path(id): Path<ExchangeBindingId>,
//! ) -> Result<Json<BindingView>, ApiError> {
//!     Ok(Json(svc.get_view(id).await?))
//! }
//! ```

pub mod error;

pub use error::{ApiError, ErrorResponse};
