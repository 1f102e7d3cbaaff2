//! `#[tap_test]` for blufi-provisioner on-device tests.
//!
//! Annotated functions are registered through `inventory` and run by the
//! `device-tests` binary, which prints TAP to the serial console.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType, Token};

/// Register a function as a TAP test.
///
/// The function either returns `()` and fails by panicking, or returns a
/// `Result` and fails with `Err`.
///
/// # Attributes
///
/// - `#[tap_test]`
/// - `#[tap_test(should_panic)]` / `#[tap_test(should_panic = "message")]`
/// - `#[tap_test(ignore)]` - reported as `# SKIP`, for tests that need a
///   peripheral the current board lacks
///
/// # Example
///
/// ```ignore
/// use blufi_provisioner_macros::tap_test;
///
/// #[tap_test]
/// fn ssid_persists() -> blufi_provisioner::testing::TestResult {
///     let mut store = NvsStore::open("blufi_test")?;
///     store.set("blufi_wifi_ssid", b"Home\0")?;
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);
    let options = match Options::parse(attr.into()) {
        Ok(options) => options,
        Err(e) => return e.to_compile_error().into(),
    };

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(..));

    let register_call = if options.ignore {
        quote! { runner.skip(#fn_name_str); }
    } else {
        match options.should_panic {
            None if returns_result => quote! { runner.run(#fn_name_str, #fn_name); },
            None => quote! { runner.run_assert(#fn_name_str, #fn_name); },
            Some(None) => quote! { runner.run_should_panic(#fn_name_str, #fn_name, None); },
            Some(Some(msg)) => {
                quote! { runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg)); }
            }
        }
    };

    let expanded = quote! {
        #input_fn

        ::inventory::submit! {
            ::blufi_provisioner::testing::TapTestEntry::new(
                #fn_name_str,
                |runner: &mut ::blufi_provisioner::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };
    expanded.into()
}

#[derive(Default)]
struct Options {
    /// `Some(None)` for a bare `should_panic`.
    should_panic: Option<Option<String>>,
    ignore: bool,
}

impl Options {
    fn parse(attr: TokenStream2) -> syn::Result<Self> {
        let mut options = Self::default();
        let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse2(attr)?;
        for meta in metas {
            match &meta {
                Meta::Path(p) if p.is_ident("should_panic") => options.should_panic = Some(None),
                Meta::Path(p) if p.is_ident("ignore") => options.ignore = true,
                Meta::NameValue(nv) if nv.path.is_ident("should_panic") => match &nv.value {
                    Expr::Lit(ExprLit {
                        lit: Lit::Str(s), ..
                    }) => options.should_panic = Some(Some(s.value())),
                    other => {
                        return Err(syn::Error::new_spanned(
                            other,
                            "should_panic expects a string literal",
                        ))
                    }
                },
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "unknown tap_test option; supported: should_panic, should_panic = \"..\", ignore",
                    ))
                }
            }
        }
        Ok(options)
    }
}
