//! `#[shardwalk::test]`: run a test body with the harness's tracing installed.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Block, ItemFn, LitStr, parse_macro_input};

/// Attribute macro for harness tests with per-test tracing.
///
/// Sync tests become plain `#[test]` functions, async tests become
/// `#[tokio::test]` functions. Arguments are runtime options and are only
/// accepted on async tests. Other attributes on the function are kept.
///
/// ```ignore
/// #[shardwalk::test]
/// fn plans_nothing_for_identical_snapshots() { ... }
///
/// #[shardwalk::test(flavor = "multi_thread", worker_threads = 4)]
/// async fn cluster_converges_after_stop() { ... }
/// ```
#[proc_macro_attribute]
pub fn test(runtime: TokenStream, item: TokenStream) -> TokenStream {
    let runtime = TokenStream2::from(runtime);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);
    let label = LitStr::new(&sig.ident.to_string(), sig.ident.span());

    let (harness, body) = if sig.asyncness.is_some() {
        (tokio_harness(runtime), traced_async(&label, &block))
    } else if runtime.is_empty() {
        (quote! { #[test] }, traced_sync(&label, &block))
    } else {
        return syn::Error::new_spanned(runtime, "runtime options need an async test")
            .to_compile_error()
            .into();
    };

    quote! {
        #harness
        #(#attrs)*
        #vis #sig {
            #body
        }
    }
    .into()
}

fn tokio_harness(runtime: TokenStream2) -> TokenStream2 {
    if runtime.is_empty() {
        quote! { #[tokio::test] }
    } else {
        quote! { #[tokio::test(#runtime)] }
    }
}

fn traced_async(label: &LitStr, block: &Block) -> TokenStream2 {
    quote! { shardwalk::trace::with_test_tracing(#label, || async move #block).await }
}

fn traced_sync(label: &LitStr, block: &Block) -> TokenStream2 {
    quote! { shardwalk::trace::with_test_tracing_sync(#label, || #block) }
}
