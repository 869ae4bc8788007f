mod api;
mod auth;
mod error;
mod module;
mod payload;
mod plant;

pub use api::{HomesApi, UpdateIntervals};
pub use auth::{OAuthSession, OAuthSessionBuilder, Token, AUTHORIZE_URL, TOKEN_URL};
pub use error::{Error, Result};
pub use module::{DeviceCategory, Module, ModuleKind, SwitchState};
pub use payload::API_BASE_URL;
pub use plant::Plant;
