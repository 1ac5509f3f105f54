//! The shared fact schema.
//!
//! ```text
//! adapter ──▶ Raw* facts ──▶ classify/resolve ──▶ CallSite, Symbol
//!                                                    │
//!                     reduce ◀── AsyncEndpoint ◀─────┤
//!                       │                            ▼
//!                       └──────────────────────▶ Finding
//! ```

mod finding;
mod model;
mod raw;

pub use finding::{BlastRadius, Confidence, Finding, FindingKind, Severity};
pub use model::{
    ApiChange, ApiChangeKind, AsyncEndpoint, CallSite, Category, ConfigCategory, ConfigUnit,
    ConfigValue, DeadLetter, DeliveryGuarantee, EndpointKey, EndpointOperation, ErrorHandling,
    RetryPolicy, RetrySpec, Symbol, SymbolKind, TimeoutSpec, ValueSource,
};
pub use raw::{
    parse_number, Location, RawAnnotation, RawArgument, RawCallSite, RawErrorGuard,
    RawFunction, RawHandleUse, RawInvocation, RawSymbol, RawSymbolKind, RawValue, ResultUsage,
    SymbolRef, Symbols,
};
