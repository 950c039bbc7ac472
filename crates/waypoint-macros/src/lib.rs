//! Attribute macros for the Waypoint telemetry facade.
//!
//! Both macros wrap the function body in a span from the tracer named after
//! the calling module. The signature is left untouched.

mod traced_macro;

use proc_macro::TokenStream;

/// Run the function inside a span.
///
/// Arguments:
/// - `name = "..."` - span name, defaults to the function name
/// - `attributes(key = literal, ...)` - static span attributes; integers
///   are recorded as `i64`, floats as `f64`
///
/// Functions returning `Result` record an `Err` on the span (exception
/// event, error status) and return it unchanged. Works on `async fn`; the
/// span stays open across `.await` points.
///
/// # Examples
///
/// ```rust,ignore
/// use waypoint::traced;
///
/// #[traced(name = "checkout", attributes(currency = "EUR", retries = 3))]
/// fn charge(amount: u64) -> Result<Receipt, InsufficientFunds> {
///     // ...
/// }
/// ```
#[proc_macro_attribute]
pub fn traced(attrs: TokenStream, item: TokenStream) -> TokenStream {
    traced_macro::expand(attrs.into(), item.into(), false).into()
}

/// Like [`traced`](macro@traced), and records the elapsed milliseconds as the
/// `execution_time_ms` span attribute.
///
/// The span name defaults to `<function name>_timed`.
#[proc_macro_attribute]
pub fn timed_span(attrs: TokenStream, item: TokenStream) -> TokenStream {
    traced_macro::expand(attrs.into(), item.into(), true).into()
}
