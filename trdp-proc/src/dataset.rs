use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Fields, GenericArgument, PathArguments, Type};

struct FieldPlan {
    ident: syn::Ident,
    element_type: TokenStream,
    count: TokenStream,
    to_value: TokenStream,
    from_value: TokenStream,
}

pub fn derive_dataset_impl(input: DeriveInput) -> syn::Result<TokenStream> {
    let name = &input.ident;
    let dataset_id = struct_dataset_id(&input)?;

    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => &named.named,
            _ => return Err(syn::Error::new(input.span(), "Dataset requires named fields")),
        },
        _ => return Err(syn::Error::new(input.span(), "Dataset can only be derived for structs")),
    };

    let mut plans = Vec::with_capacity(fields.len());
    for field in fields {
        plans.push(field_plan(field)?);
    }

    let element_descriptors = plans.iter().map(|p| {
        let element_type = &p.element_type;
        let count = &p.count;
        quote! {
            ::trdp_wire::marshal::ElementDescriptor {
                element_type: #element_type,
                count: #count,
            }
        }
    });

    let to_values = plans.iter().map(|p| &p.to_value);
    let from_value_stmts = plans.iter().map(|p| &p.from_value);
    let field_idents: Vec<_> = plans.iter().map(|p| p.ident.clone()).collect();
    let field_count = plans.len();

    Ok(quote! {
        #[automatically_derived]
        impl ::trdp_wire::marshal::Dataset for #name {
            fn descriptor() -> ::trdp_wire::marshal::DatasetDescriptor {
                ::trdp_wire::marshal::DatasetDescriptor {
                    dataset_id: #dataset_id,
                    elements: ::std::vec![ #(#element_descriptors),* ],
                }
            }

            fn to_values(&self) -> ::std::vec::Vec<::trdp_wire::marshal::DatasetValue> {
                ::std::vec![ #(#to_values),* ]
            }

            fn from_values(
                values: &[::trdp_wire::marshal::DatasetValue],
            ) -> ::trdp_wire::error::WireResult<Self> {
                if values.len() != #field_count {
                    return ::std::result::Result::Err(::trdp_wire::error::WireError::LengthMismatch);
                }
                let mut iter = values.iter();
                #(#from_value_stmts)*
                ::std::result::Result::Ok(#name { #(#field_idents),* })
            }
        }
    })
}

fn struct_dataset_id(input: &DeriveInput) -> syn::Result<syn::LitInt> {
    for attr in &input.attrs {
        if attr.path().is_ident("trdp") {
            let mut id = None;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    let value = meta.value()?;
                    id = Some(value.parse::<syn::LitInt>()?);
                }
                Ok(())
            })?;
            if let Some(id) = id {
                return Ok(id);
            }
        }
    }
    Err(syn::Error::new(input.span(), "Dataset requires #[trdp(id = N)]"))
}

#[derive(Default)]
struct FieldAttrs {
    type_override: Option<String>,
    nested: bool,
}

fn parse_field_attrs(field: &syn::Field) -> syn::Result<FieldAttrs> {
    let mut attrs = FieldAttrs::default();
    for attr in &field.attrs {
        if attr.path().is_ident("trdp") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("type") {
                    let value = meta.value()?;
                    let lit: syn::LitStr = value.parse()?;
                    attrs.type_override = Some(lit.value());
                } else if meta.path.is_ident("nested") {
                    attrs.nested = true;
                }
                Ok(())
            })?;
        }
    }
    Ok(attrs)
}

fn field_plan(field: &syn::Field) -> syn::Result<FieldPlan> {
    let ident = field.ident.clone().ok_or_else(|| syn::Error::new(field.span(), "tuple structs are not supported"))?;
    let attrs = parse_field_attrs(field)?;

    if attrs.nested {
        let ty = &field.ty;
        return Ok(FieldPlan {
            ident: ident.clone(),
            element_type: quote! { ::trdp_wire::marshal::ElementType::Nested(<#ty as ::trdp_wire::marshal::Dataset>::descriptor().dataset_id) },
            count: quote! { 1 },
            to_value: quote! { ::trdp_wire::marshal::DatasetValue::Nested(self.#ident.to_values()) },
            from_value: quote! {
                let #ident = match iter.next() {
                    ::std::option::Option::Some(::trdp_wire::marshal::DatasetValue::Nested(inner)) => {
                        <#ty as ::trdp_wire::marshal::Dataset>::from_values(inner)?
                    }
                    _ => return ::std::result::Result::Err(::trdp_wire::error::WireError::LengthMismatch),
                };
            },
        });
    }

    if let Some(over) = &attrs.type_override {
        return scalar_override_plan(ident, over, field.span());
    }

    match array_kind(&field.ty) {
        ArrayKind::Scalar => {
            let (elem_variant, value_variant) = scalar_variant(&field.ty)?;
            Ok(scalar_plan(ident, elem_variant, value_variant))
        }
        ArrayKind::Variable(elem_ty) => {
            let (elem_variant, value_variant) = scalar_variant(&elem_ty)?;
            Ok(array_plan(ident, elem_variant, value_variant, quote! { 0 }, false))
        }
        ArrayKind::Fixed(elem_ty, len) => {
            let (elem_variant, value_variant) = scalar_variant(&elem_ty)?;
            Ok(array_plan(ident, elem_variant, value_variant, quote! { #len }, true))
        }
    }
}

enum ArrayKind {
    Scalar,
    Variable(Type),
    Fixed(Type, syn::Expr),
}

fn array_kind(ty: &Type) -> ArrayKind {
    if let Type::Path(p) = ty {
        if let Some(seg) = p.path.segments.last() {
            if seg.ident == "Vec" {
                if let PathArguments::AngleBracketed(args) = &seg.arguments {
                    if let Some(GenericArgument::Type(inner)) = args.args.first() {
                        return ArrayKind::Variable(inner.clone());
                    }
                }
            }
        }
    }
    if let Type::Array(arr) = ty {
        return ArrayKind::Fixed((*arr.elem).clone(), arr.len.clone());
    }
    ArrayKind::Scalar
}

/// Maps a field's underlying Rust type to its `(ElementType variant,
/// DatasetValue variant)` pair — the two enums don't always share a name
/// (`bool` is `ElementType::Bool8` / `DatasetValue::Bool`).
fn scalar_variant(ty: &Type) -> syn::Result<(&'static str, &'static str)> {
    let name = match ty {
        Type::Path(p) => p.path.segments.last().map(|s| s.ident.to_string()),
        _ => None,
    };
    match name.as_deref() {
        Some("bool") => Ok(("Bool8", "Bool")),
        Some("i8") => Ok(("Int8", "Int8")),
        Some("i16") => Ok(("Int16", "Int16")),
        Some("i32") => Ok(("Int32", "Int32")),
        Some("i64") => Ok(("Int64", "Int64")),
        Some("u8") => Ok(("UInt8", "UInt8")),
        Some("u16") => Ok(("UInt16", "UInt16")),
        Some("u32") => Ok(("UInt32", "UInt32")),
        Some("u64") => Ok(("UInt64", "UInt64")),
        Some("f32") => Ok(("Real32", "Real32")),
        Some("f64") => Ok(("Real64", "Real64")),
        _ => Err(syn::Error::new(
            ty.span(),
            "unsupported field type for Dataset derive; annotate with #[trdp(type = \"...\")] or #[trdp(nested)]",
        )),
    }
}

fn scalar_plan(ident: syn::Ident, elem_variant: &'static str, value_variant: &'static str) -> FieldPlan {
    let element_type = quote_ident("ElementType", elem_variant);
    let value_ctor = quote_ident("DatasetValue", value_variant);
    FieldPlan {
        ident: ident.clone(),
        element_type: quote! { ::trdp_wire::marshal::#element_type },
        count: quote! { 1 },
        to_value: quote! { ::trdp_wire::marshal::#value_ctor(self.#ident) },
        from_value: quote! {
            let #ident = match iter.next() {
                ::std::option::Option::Some(::trdp_wire::marshal::#value_ctor(v)) => *v,
                _ => return ::std::result::Result::Err(::trdp_wire::error::WireError::LengthMismatch),
            };
        },
    }
}

fn array_plan(
    ident: syn::Ident,
    elem_variant: &'static str,
    value_variant: &'static str,
    count: TokenStream,
    is_fixed: bool,
) -> FieldPlan {
    let element_type = quote_ident("ElementType", elem_variant);
    let value_ctor = quote_ident("DatasetValue", value_variant);
    let collect = if is_fixed {
        quote! { out.try_into().map_err(|_| ::trdp_wire::error::WireError::LengthMismatch)? }
    } else {
        quote! { out }
    };
    FieldPlan {
        ident: ident.clone(),
        element_type: quote! { ::trdp_wire::marshal::#element_type },
        count,
        to_value: quote! {
            ::trdp_wire::marshal::DatasetValue::Array(
                self.#ident.iter().map(|v| ::trdp_wire::marshal::#value_ctor(*v)).collect()
            )
        },
        from_value: quote! {
            let #ident = match iter.next() {
                ::std::option::Option::Some(::trdp_wire::marshal::DatasetValue::Array(items)) => {
                    let mut out = ::std::vec::Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            ::trdp_wire::marshal::#value_ctor(v) => out.push(*v),
                            _ => return ::std::result::Result::Err(::trdp_wire::error::WireError::LengthMismatch),
                        }
                    }
                    #collect
                }
                _ => return ::std::result::Result::Err(::trdp_wire::error::WireError::LengthMismatch),
            };
        },
    }
}

fn scalar_override_plan(ident: syn::Ident, over: &str, span: proc_macro2::Span) -> syn::Result<FieldPlan> {
    let variant = match over {
        "char8" => "Char8",
        "utf16" => "Utf16",
        "time32" => "TimeDate32",
        other => {
            return Err(syn::Error::new(
                span,
                format!("unknown #[trdp(type = \"{other}\")] override"),
            ))
        }
    };
    Ok(scalar_plan(ident, variant, variant))
}

fn quote_ident(module: &str, variant: &str) -> TokenStream {
    let module = syn::Ident::new(module, proc_macro2::Span::call_site());
    let variant = syn::Ident::new(variant, proc_macro2::Span::call_site());
    quote_spanned! { proc_macro2::Span::call_site() => #module::#variant }
}
