use quote::quote;
use syn::{Data, DeriveInput, Fields, ItemStruct, LitByteStr, parse_macro_input};

use proc_macro::TokenStream;

/// Serializes every field in declaration order through
/// `crate::byteorder::WriteBytesLe`.
#[proc_macro_derive(ToBytes)]
pub fn derive_to_bytes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let fields: Vec<syn::Member> = match input.data {
        Data::Struct(ref s) => match s.fields {
            Fields::Named(ref nf) => nf
                .named
                .iter()
                .filter_map(|f| f.ident.clone())
                .map(syn::Member::from)
                .collect(),
            Fields::Unnamed(ref uf) => uf
                .unnamed
                .iter()
                .enumerate()
                .map(|(i, _)| syn::Index::from(i).into())
                .collect(),
            Fields::Unit => Vec::new(),
        },
        _ => {
            return syn::Error::new_spanned(&name, "ToBytes can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let expanded = quote! {
        impl crate::byteorder::WriteBytesLe for #name {
            fn write_le(&self, dst: &mut Vec<u8>) {
                #( crate::byteorder::WriteBytesLe::write_le(&self.#fields, dst); )*
            }

            fn le_len(&self) -> usize {
                0 #( + crate::byteorder::WriteBytesLe::le_len(&self.#fields) )*
            }
        }
    };

    TokenStream::from(expanded)
}

/// Implements `RiffChunk` for a `ToBytes` struct: `#[riff_chunk(b"fmt ")]`.
#[proc_macro_attribute]
pub fn riff_chunk(attr: TokenStream, item: TokenStream) -> TokenStream {
    let id = parse_macro_input!(attr as LitByteStr);
    let id_bytes = id.value();

    if id_bytes.len() != 4 {
        return syn::Error::new_spanned(&id, "riff_chunk expects 4 bytes")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as ItemStruct);
    let name = &input.ident;

    let expanded = quote! {
        #input

        impl RiffChunk for #name {
            fn chunk_id(&self) -> &[u8; 4] {
                const ID: [u8; 4] = [#(#id_bytes),*];
                &ID
            }

            fn chunk_data(&self) -> Vec<u8> {
                self.to_le_vec()
            }
        }
    };
    TokenStream::from(expanded)
}
