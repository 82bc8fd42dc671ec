//! Graphwright Core - records, schema and boundary guards
//!
//! This crate holds the data model shared by the ingestion pipeline, the
//! graph stores and the tool-call layer, together with the resilience
//! primitives (circuit breaker, rate limiter) and the input guards (path
//! sanitizer, query guardrail) that sit at the system boundary.

pub mod breaker;
pub mod clock;
pub mod context;
pub mod error;
pub mod guardrail;
pub mod limits;
pub mod rate_limit;
pub mod record;
pub mod report;
pub mod sanitize;
pub mod schema;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{RepoType, RepositoryContext};
pub use error::{
    BreakerError, Error, GuardrailError, RateLimitError, Result, SchemaError, SecurityError,
};
pub use guardrail::{enforce_limit, QueryCheck, QueryGuardrail};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use record::{
    EntityRecord, NodeKey, NodeRef, Properties, RelationshipRecord, Scalar, ScalarKind,
};
pub use report::{BuildReport, Rejection, SoftFailure, UnresolvedRelationship};
pub use sanitize::{PathSanitizer, SanitizedPath};
pub use schema::{GraphSchema, NodeSchema, PropertySchema, RelationshipSchema, Retention};
