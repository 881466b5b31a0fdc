use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Derives `changed_fields()` and `is_noop()` for partial-update structs.
///
/// Every `Option<_>` field holding `Some` counts as changed, its name is
/// reported in declaration order. Non-`Option` fields are ignored, they
/// are expected to be keys.
#[proc_macro_derive(ChangedFields)]
pub fn changed_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let struct_name = input.ident;

    let fields = if let syn::Data::Struct(syn::DataStruct {
                                              fields: syn::Fields::Named(ref fields),
                                              ..
                                          }) = input.data {
        fields
    } else {
        panic!("ChangedFields supports named struct fields only");
    };

    let optional_fields = fields.named.iter().filter_map(|field| {
        let field_name = field.ident.as_ref()?;
        let syn::Type::Path(type_path) = &field.ty else {
            return None
        };
        if type_path.path.segments.last()?.ident == "Option" {
            Some(field_name)
        } else {
            None
        }
    }).collect::<Vec<_>>();

    let checks = optional_fields.iter().map(|field_name| {
        quote! {
            if self.#field_name.is_some() {
                fields.push(stringify!(#field_name));
            }
        }
    });

    let expanded = quote! {
        impl #struct_name {
            pub fn changed_fields(&self) -> Vec<&'static str> {
                let mut fields = Vec::new();
                #(#checks)*
                fields
            }
            pub fn is_noop(&self) -> bool {
                true #(&& self.#optional_fields.is_none())*
            }
        }
    };

    TokenStream::from(expanded)
}
