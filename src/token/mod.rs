//! Compact HMAC-protected tokens for auth, state and error payloads.

mod codec;
mod payload;

pub use codec::{
    Error, IssueAuthOptions, SplitToken, TOKEN_ALG, TokenCodec, TokenHeader, VerifyOptions,
    decode_unverified, refresh_limit_for,
};
pub use payload::{AuthPayload, ErrorPayload, PlatformBound, StatePayload};
