//! Expansion of `#[traced]` and `#[timed_span]`.

use proc_macro2::{TokenStream, TokenTree};
use quote::{quote, ToTokens};
use syn::parse::Parser;
use syn::{Error, Ident, ItemFn, Lit, LitStr, ReturnType, Type, TypePath};

const NAME_ARG: &str = "name";
const ATTRIBUTES_ARG: &str = "attributes";

/// Parsed macro arguments.
struct TracedArgs {
    name: Option<LitStr>,
    attributes: Vec<(Ident, Lit)>,
}

fn parse_args(attrs: TokenStream) -> Result<TracedArgs, Error> {
    let mut args = TracedArgs {
        name: None,
        attributes: Vec::new(),
    };

    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident(NAME_ARG) {
            args.name = Some(meta.value()?.parse::<LitStr>()?);
            return Ok(());
        }
        if meta.path.is_ident(ATTRIBUTES_ARG) {
            return meta.parse_nested_meta(|entry| {
                let key = entry
                    .path
                    .get_ident()
                    .cloned()
                    .ok_or_else(|| entry.error("attribute keys must be plain identifiers"))?;
                let value = entry.value()?.parse::<Lit>()?;
                args.attributes.push((key, value));
                Ok(())
            });
        }
        Err(meta.error("unsupported argument, expected `name` or `attributes(..)`"))
    });
    parser.parse2(attrs)?;

    Ok(args)
}

/// Expand a traced function. `timed` selects `#[timed_span]` behavior.
pub fn expand(attrs: TokenStream, item: TokenStream, timed: bool) -> TokenStream {
    let input_fn = match syn::parse2::<ItemFn>(item) {
        Ok(f) => f,
        Err(e) => return e.to_compile_error(),
    };
    let args = match parse_args(attrs) {
        Ok(args) => args,
        Err(e) => return e.to_compile_error(),
    };
    match generate(&input_fn, args, timed) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error(),
    }
}

fn generate(input_fn: &ItemFn, args: TracedArgs, timed: bool) -> Result<TokenStream, Error> {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input_fn;

    if sig.constness.is_some() {
        return Err(Error::new_spanned(
            sig.constness,
            "traced functions cannot be const",
        ));
    }

    let span_name = match args.name {
        Some(name) => name.value(),
        None if timed => format!("{}_timed", sig.ident),
        None => sig.ident.to_string(),
    };

    let mut attribute_values = Vec::with_capacity(args.attributes.len());
    for (key, value) in &args.attributes {
        attribute_values.push(attribute_value(key, value)?);
    }
    let with_attributes = if attribute_values.is_empty() {
        quote! {}
    } else {
        quote! { .with_attributes([#(#attribute_values),*]) }
    };
    let with_timing = if timed {
        quote! { .timed() }
    } else {
        quote! {}
    };

    let fallible = match &sig.output {
        ReturnType::Type(_, ty) => is_result_type(ty),
        ReturnType::Default => false,
    };

    // The body keeps its declared return type unless that type is opaque.
    let body = match &sig.output {
        ReturnType::Type(_, ty) if !contains_impl(ty.to_token_stream()) => quote! {
            let __waypoint_output: #ty = #block;
            __waypoint_output
        },
        _ => quote! { #block },
    };

    let traced = quote! {
        ::waypoint::observability::span::Traced::new(#span_name)
            .with_tracer(::waypoint::observability::tracer::get_tracer(::core::module_path!()))
            #with_attributes
            #with_timing
    };

    let call = match (sig.asyncness.is_some(), fallible) {
        (false, false) => quote! { #traced.run(move || { #body }) },
        (false, true) => quote! { #traced.try_run(move || { #body }) },
        (true, false) => quote! { #traced.run_async(async move { #body }).await },
        (true, true) => quote! { #traced.try_run_async(async move { #body }).await },
    };

    Ok(quote! {
        #(#attrs)*
        #vis #sig {
            #call
        }
    })
}

fn attribute_value(key: &Ident, value: &Lit) -> Result<TokenStream, Error> {
    let key = key.to_string();
    let value = match value {
        Lit::Str(s) => quote! { #s },
        Lit::Bool(b) => quote! { #b },
        Lit::Int(i) => quote! { (#i as i64) },
        Lit::Float(f) => quote! { (#f as f64) },
        other => {
            return Err(Error::new_spanned(
                other,
                "attribute values must be string, integer, float or bool literals",
            ))
        }
    };
    Ok(quote! { ::waypoint::opentelemetry::KeyValue::new(#key, #value) })
}

/// Checks if a type is a Result<T, E>.
fn is_result_type(ty: &Type) -> bool {
    match ty {
        Type::Path(TypePath { path, .. }) => path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Result"),
        _ => false,
    }
}

fn contains_impl(tokens: TokenStream) -> bool {
    tokens.into_iter().any(|tt| match tt {
        TokenTree::Ident(ident) => ident == "impl",
        TokenTree::Group(group) => contains_impl(group.stream()),
        _ => false,
    })
}
