//! Derive macro mapping Rust records and enumerations to h5bind element
//! types.
//!
//! `#[derive(H5Type)]` on a struct with named fields produces a packed
//! record whose members are the fields, in declaration order; every field
//! type must itself implement `H5Type`. On a fieldless enum with an integer
//! `#[repr]` it produces an enumeration over that integer type.
//!
//! A field or variant can be stored under another name with
//! `#[h5bind(name = "...")]`.

use proc_macro::TokenStream;
use proc_macro2::{Ident, Span};
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DataEnum, DeriveInput, Fields, LitStr};

const INTEGER_REPRS: &[&str] = &["i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64"];

/// Derive `h5bind::H5Type` for a record struct or a fieldless enum.
#[proc_macro_derive(H5Type, attributes(h5bind))]
pub fn derive_h5type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match impl_h5type(&input) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn impl_h5type(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "H5Type cannot be derived for generic types",
        ));
    }

    let body = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) if !named.named.is_empty() => record_impl(name, named)?,
            Fields::Named(_) => {
                return Err(syn::Error::new_spanned(name, "a record needs at least one field"))
            }
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "H5Type can only be derived for structs with named fields",
                ))
            }
        },
        Data::Enum(data) => enum_impl(name, &input.attrs, data)?,
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(name, "H5Type cannot be derived for unions"))
        }
    };

    Ok(quote! {
        const _: () = {
            #body
            ::h5bind::__impl_scalar_data!(#name);
        };
    })
}

/// The `#[h5bind(name = "...")]` override, if present.
fn stored_name(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut renamed = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("h5bind")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                renamed = Some(lit.value());
                Ok(())
            } else {
                Err(meta.error("unsupported h5bind attribute"))
            }
        })?;
    }
    Ok(renamed)
}

fn record_impl(
    name: &Ident,
    fields: &syn::FieldsNamed,
) -> syn::Result<proc_macro2::TokenStream> {
    let record = name.to_string();
    let mut layout = Vec::new();
    let mut encode = Vec::new();
    let mut decode = Vec::new();

    for (index, field) in fields.named.iter().enumerate() {
        let Some(ident) = field.ident.as_ref() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };
        let ty = &field.ty;
        let member = stored_name(&field.attrs)?.unwrap_or_else(|| ident.to_string());

        layout.push(quote! {
            .field(#member, <#ty as ::h5bind::H5Type>::type_descriptor()?)
        });
        encode.push(quote! {
            ::h5bind::H5Type::encode(&self.#ident, &mut out[members[#index].clone()], vlen)?;
        });
        decode.push(quote! {
            #ident: <#ty as ::h5bind::H5Type>::decode(&raw[members[#index].clone()], vlen)?,
        });
    }

    Ok(quote! {
        static MEMBERS: ::std::sync::OnceLock<::std::vec::Vec<::core::ops::Range<usize>>> =
            ::std::sync::OnceLock::new();

        fn members() -> ::h5bind::Result<&'static [::core::ops::Range<usize>]> {
            if let ::core::option::Option::Some(members) = MEMBERS.get() {
                return ::core::result::Result::Ok(members);
            }
            let datatype = <#name as ::h5bind::H5Type>::type_descriptor()?;
            let ranges = ::h5bind::type_builders::member_ranges(&datatype)?;
            ::core::result::Result::Ok(MEMBERS.get_or_init(|| ranges))
        }

        impl ::h5bind::H5Type for #name {
            fn type_descriptor() -> ::h5bind::Result<::h5bind::engine::Datatype> {
                ::h5bind::record_descriptor::<Self>(|| {
                    ::h5bind::CompoundType::new(#record)
                        .packed()
                        #(#layout)*
                        .build()
                })
            }

            fn encode(
                &self,
                out: &mut [u8],
                vlen: &mut dyn ::h5bind::VlenSink,
            ) -> ::h5bind::Result<()> {
                let members = members()?;
                #(#encode)*
                ::core::result::Result::Ok(())
            }

            fn decode(raw: &[u8], vlen: &mut dyn ::h5bind::VlenSource) -> ::h5bind::Result<Self> {
                let members = members()?;
                ::core::result::Result::Ok(Self {
                    #(#decode)*
                })
            }
        }
    })
}

/// The integer type named by `#[repr(...)]`.
fn integer_repr(name: &Ident, attrs: &[Attribute]) -> syn::Result<Ident> {
    let mut repr = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("repr")) {
        attr.parse_nested_meta(|meta| {
            if let Some(ident) = meta.path.get_ident() {
                if INTEGER_REPRS.contains(&ident.to_string().as_str()) {
                    repr = Some(ident.clone());
                }
            }
            Ok(())
        })?;
    }
    repr.ok_or_else(|| {
        syn::Error::new(
            name.span(),
            "H5Type enumerations need an integer #[repr], e.g. #[repr(u8)]",
        )
    })
}

fn enum_impl(
    name: &Ident,
    attrs: &[Attribute],
    data: &DataEnum,
) -> syn::Result<proc_macro2::TokenStream> {
    let repr = integer_repr(name, attrs)?;
    if data.variants.is_empty() {
        return Err(syn::Error::new_spanned(name, "an enumeration needs at least one variant"));
    }

    let mut members = Vec::new();
    let mut variants = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "H5Type enumerations cannot have fields",
            ));
        }
        let ident = &variant.ident;
        let member = stored_name(&variant.attrs)?.unwrap_or_else(|| ident.to_string());
        members.push(quote! { .member(#member, #name::#ident as i64) });
        variants.push(ident.clone());
    }

    let enumeration = name.to_string();
    let context = LitStr::new(&format!("decoding enumeration {enumeration}"), Span::call_site());
    Ok(quote! {
        impl ::h5bind::H5Type for #name {
            fn type_descriptor() -> ::h5bind::Result<::h5bind::engine::Datatype> {
                ::h5bind::record_descriptor::<Self>(|| {
                    ::h5bind::EnumType::new::<#repr>(#enumeration)
                        #(#members)*
                        .build()
                })
            }

            fn encode(
                &self,
                out: &mut [u8],
                vlen: &mut dyn ::h5bind::VlenSink,
            ) -> ::h5bind::Result<()> {
                let value: #repr = match self {
                    #(Self::#variants => Self::#variants as #repr,)*
                };
                ::h5bind::H5Type::encode(&value, out, vlen)
            }

            fn decode(raw: &[u8], vlen: &mut dyn ::h5bind::VlenSource) -> ::h5bind::Result<Self> {
                let value = <#repr as ::h5bind::H5Type>::decode(raw, vlen)?;
                #(
                    if value == Self::#variants as #repr {
                        return ::core::result::Result::Ok(Self::#variants);
                    }
                )*
                ::core::result::Result::Err(::h5bind::Error::Conversion {
                    context: #context.into(),
                    detail: ::std::format!("{value} is not a member"),
                })
            }
        }
    })
}
