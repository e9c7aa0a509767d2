use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, FnArg, ItemFn, ReturnType};

mod contract_meta;
use contract_meta::{classify, parse_contract_args, parse_fields, returns_result, TransformArgs};

/// Derive `bowline::HasContract` from a struct's named fields.
///
/// `#[contract(name = "..", open)]` on the struct overrides the contract
/// name and accepts undeclared fields. `#[contract(min = .., max = ..,
/// rename = "..")]` on a field adds bounds or changes the field name.
#[proc_macro_derive(Contract, attributes(contract))]
pub fn derive_contract(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let args = match parse_contract_args(&input) {
        Ok(args) => args,
        Err(e) => return e.write_errors().into(),
    };
    let fields = match parse_fields(&input) {
        Ok(fields) => fields,
        Err(e) => return e.write_errors().into(),
    };

    let struct_name = &input.ident;
    let contract_name = args.name.unwrap_or_else(|| struct_name.to_string());

    let field_specs = fields.iter().filter_map(|f| {
        let field_name = f.rename.clone().or_else(|| f.ident.as_ref().map(|i| i.to_string()))?;
        let (kind, required) = classify(&f.ty);
        let kind = syn::Ident::new(kind, Span::call_site());
        let min = option_tokens(f.min);
        let max = option_tokens(f.max);

        Some(quote! {
            .with_field(::bowline::FieldSpec {
                name: #field_name.to_string(),
                kind: ::bowline::FieldKind::#kind,
                required: #required,
                min: #min,
                max: #max,
            })
        })
    });

    let open = if args.open {
        quote!(.open())
    } else {
        quote!()
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let expanded = quote! {
        impl #impl_generics ::bowline::HasContract for #struct_name #ty_generics #where_clause {
            fn contract() -> ::bowline::Contract {
                ::bowline::Contract::new(#contract_name)
                    #(#field_specs)*
                    #open
            }
        }
    };

    TokenStream::from(expanded)
}

fn option_tokens(value: Option<f64>) -> proc_macro2::TokenStream {
    match value {
        Some(v) => quote!(::std::option::Option::Some(#v)),
        None => quote!(::std::option::Option::None),
    }
}

/// Register a top-level function as a named transform.
///
/// The function takes one deserializable argument and returns a
/// serializable value or a `Result` whose error converts into
/// `anyhow::Error`. The name defaults to the function's identifier and can
/// be set with `#[transform(name = "..")]`.
#[proc_macro_attribute]
pub fn transform(attr: TokenStream, item: TokenStream) -> TokenStream {
    let metas = match darling::ast::NestedMeta::parse_meta_list(attr.into()) {
        Ok(metas) => metas,
        Err(e) => return darling::Error::from(e).write_errors().into(),
    };
    let args = match <TransformArgs as darling::FromMeta>::from_list(&metas) {
        Ok(args) => args,
        Err(e) => return e.write_errors().into(),
    };
    let func = parse_macro_input!(item as ItemFn);

    if let Err(e) = check_signature(&func) {
        return e.to_compile_error().into();
    }

    let fn_name = &func.sig.ident;
    let transform_name = args.name.unwrap_or_else(|| fn_name.to_string());

    let adapter = match &func.sig.output {
        ReturnType::Type(_, ty) if returns_result(ty) => quote!(call_typed),
        _ => quote!(call_infallible),
    };

    let mod_name = syn::Ident::new(&format!("__bowline_transform_{}", fn_name), fn_name.span());

    let expanded = quote! {
        #func

        #[doc(hidden)]
        mod #mod_name {
            #[allow(unused_imports)]
            use super::*;

            fn shim(
                value: ::bowline::Value,
            ) -> ::bowline::__private::anyhow::Result<::bowline::Value> {
                ::bowline::registry::#adapter(super::#fn_name, value)
            }

            ::bowline::__private::inventory::submit! {
                ::bowline::registry::Transform::new(#transform_name, shim)
            }
        }
    };

    TokenStream::from(expanded)
}

fn check_signature(func: &ItemFn) -> syn::Result<()> {
    let sig = &func.sig;
    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new_spanned(asyncness, "transforms must be synchronous"));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&sig.generics, "transforms cannot be generic"));
    }
    if sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(&sig.inputs, "transforms take exactly one argument"));
    }
    if let Some(FnArg::Receiver(receiver)) = sig.inputs.first() {
        return Err(syn::Error::new_spanned(receiver, "transforms must be free functions"));
    }
    Ok(())
}
