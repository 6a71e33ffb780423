//! `#[derive(Dataset)]`: generates a `trdp_wire::marshal::Dataset` impl from
//! a struct's field types, the native-struct counterpart to building a
//! `DatasetDescriptor` by hand.
//!
//! Field types map to element types as follows unless overridden with
//! `#[trdp(type = "...")]`: `bool` -> Bool8, `i8/i16/i32/i64` ->
//! Int8/16/32/64, `u8/u16/u32/u64` -> UInt8/16/32/64, `f32/f64` ->
//! Real32/64. `Vec<T>` is a variable-length array (`count = 0`) and must be
//! preceded by a `u16` field carrying its run length, as the wire format
//! requires. `[T; N]` is a fixed-length array. A field type that itself
//! derives `Dataset` is nested with `#[trdp(nested)]`.
//!
//! Struct-level `#[trdp(id = N)]` sets the dataset id.

extern crate proc_macro;

mod dataset;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

#[proc_macro_derive(Dataset, attributes(trdp))]
pub fn derive_dataset(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    dataset::derive_dataset_impl(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
