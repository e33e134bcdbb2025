//! Derive macro for error types.
//!
//! ```ignore
//! use asim_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum AsmError {
//!     #[error("unknown mnemonic `{0}`")]
//!     UnknownMnemonic(String),
//!
//!     #[error("register {index} out of range ({available} available)")]
//!     Register { index: u32, available: usize, line: usize },
//!
//!     #[error("stack overflow")]
//!     StackOverflow,
//! }
//! ```
//!
//! Only the fields named in the message are bound, so a variant may carry
//! context that its message leaves out.

use proc_macro::TokenStream;
use quote::{ToTokens, format_ident, quote};
use syn::{Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let message = error_message(
                        &variant.attrs,
                        &variant.ident,
                        &format!("variant `{}`", variant.ident),
                    )?;
                    let ident = &variant.ident;
                    let (pattern, args) = bind_fields(&variant.fields, &message);
                    let format = positional_to_named(&message);
                    Ok(quote! {
                        Self::#ident #pattern => write!(f, #format #(, #args)*),
                    })
                })
                .collect::<syn::Result<Vec<_>>>()?;
            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data) => {
            let message = error_message(&input.attrs, name, &format!("type `{name}`"))?;
            let (pattern, args) = bind_fields(&data.fields, &message);
            let format = positional_to_named(&message);
            quote! {
                let Self #pattern = self;
                write!(f, #format #(, #args)*)
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Builds the destructuring pattern and the `name = name` format arguments
/// for the fields that `message` references.
fn bind_fields(
    fields: &Fields,
    message: &str,
) -> (proc_macro2::TokenStream, Vec<proc_macro2::TokenStream>) {
    let used = referenced_arguments(message);
    match fields {
        Fields::Unit => (quote! {}, Vec::new()),
        Fields::Named(named) => {
            let bound: Vec<_> = named
                .named
                .iter()
                .filter_map(|field| field.ident.as_ref())
                .filter(|ident| used.iter().any(|u| ident == &u.as_str()))
                .collect();
            let args = bound.iter().map(|ident| quote! { #ident = #ident }).collect();
            (quote! { { #(#bound,)* .. } }, args)
        }
        Fields::Unnamed(unnamed) => {
            let mut args = Vec::new();
            let slots: Vec<_> = (0..unnamed.unnamed.len())
                .map(|i| {
                    if used.iter().any(|u| u == &i.to_string()) {
                        let ident = format_ident!("f{}", i);
                        args.push(quote! { #ident = #ident });
                        ident.into_token_stream()
                    } else {
                        quote! { _ }
                    }
                })
                .collect();
            (quote! { ( #(#slots),* ) }, args)
        }
    }
}

/// Collects the argument names used inside `{...}` placeholders, skipping
/// escaped braces and format specs.
fn referenced_arguments(message: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = message.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
            }
            '{' => {
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == '}' || c == ':' {
                        break;
                    }
                    name.push(c);
                }
                let name = name.trim().to_string();
                if !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
            }
            _ => {}
        }
    }
    names
}

/// Rewrites `{0}`, `{1:?}` into `{f0}`, `{f1:?}` so tuple fields can be
/// passed as named arguments.
fn positional_to_named(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c != '{' {
            continue;
        }
        if chars.peek() == Some(&'{') {
            out.push('{');
            chars.next();
            continue;
        }
        if chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            out.push('f');
        }
    }
    out
}

fn error_message<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    let Some(attr) = attrs.iter().find(|attr| attr.path().is_ident("error")) else {
        return Err(syn::Error::new_spanned(
            target,
            format!("missing #[error(\"...\")] attribute on {target_desc}"),
        ));
    };

    let Meta::List(list) = &attr.meta else {
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "expected #[error(\"message\")]",
        ));
    };

    match syn::parse2::<Lit>(list.tokens.clone()) {
        Ok(Lit::Str(lit)) => Ok(lit.value()),
        _ => Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] message must be a string literal",
        )),
    }
}
