use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, Token};

/// Test attribute that installs tracing and opens a span named after the test.
///
/// Async tests run under `#[tokio::test]`; any arguments other than
/// `timeout_ms` are passed through to it. `timeout_ms = N` fails an async test
/// that has not finished after N milliseconds, which keeps a lock ordering bug
/// from hanging the whole suite.
///
/// #[tapeq::test]
/// fn sync_case() { ... }
///
/// #[tapeq::test(timeout_ms = 5_000, flavor = "multi_thread")]
/// async fn async_case() { ... }
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr with Punctuated::<Meta, Token![,]>::parse_terminated);
    let input = parse_macro_input!(item as ItemFn);

    let mut timeout_ms: Option<u64> = None;
    let mut runtime_args = Vec::new();
    for arg in args {
        match &arg {
            Meta::NameValue(nv) if nv.path.is_ident("timeout_ms") => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Int(ms), ..
                }) => match ms.base10_parse::<u64>() {
                    Ok(ms) => timeout_ms = Some(ms),
                    Err(e) => return e.to_compile_error().into(),
                },
                other => {
                    return syn::Error::new_spanned(other, "timeout_ms takes an integer literal")
                        .to_compile_error()
                        .into()
                }
            },
            _ => runtime_args.push(arg),
        }
    }

    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = &sig.ident;

    if sig.asyncness.is_none() {
        if let Some(ms) = timeout_ms {
            return syn::Error::new_spanned(
                sig.fn_token,
                format!("timeout_ms = {ms} needs an async test"),
            )
            .to_compile_error()
            .into();
        }
        return quote! {
            #[test]
            #vis #sig {
                tapeq::trace::with_test_tracing_sync(stringify!(#name), || #block)
            }
        }
        .into();
    }

    let runtime = if runtime_args.is_empty() {
        quote! { #[tokio::test] }
    } else {
        quote! { #[tokio::test( #(#runtime_args),* )] }
    };
    let body = match timeout_ms {
        Some(ms) => quote! {
            tapeq::trace::with_test_tracing(stringify!(#name), || async move {
                match tokio::time::timeout(std::time::Duration::from_millis(#ms), async move #block).await {
                    Ok(out) => out,
                    Err(_) => panic!("{} did not finish within {} ms", stringify!(#name), #ms),
                }
            })
            .await
        },
        None => quote! {
            tapeq::trace::with_test_tracing(stringify!(#name), || async move #block).await
        },
    };
    quote! {
        #runtime
        #vis #sig {
            #body
        }
    }
    .into()
}
