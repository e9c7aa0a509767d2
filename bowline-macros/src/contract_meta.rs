use darling::{FromAttributes, FromField, FromMeta};
use syn::{DeriveInput, Fields, GenericArgument, PathArguments, Type};

/// Parsed attributes from #[contract(...)] on the struct
#[derive(Debug, FromAttributes)]
#[darling(attributes(contract))]
pub struct ContractArgs {
    #[darling(default)]
    pub name: Option<String>,

    /// Accept undeclared fields
    #[darling(default)]
    pub open: bool,
}

/// Parsed attributes from #[contract(...)] on a field
#[derive(Debug, FromField)]
#[darling(attributes(contract))]
pub struct ContractField {
    pub ident: Option<syn::Ident>,
    pub ty: Type,

    #[darling(default)]
    pub rename: Option<String>,

    #[darling(default)]
    pub min: Option<f64>,

    #[darling(default)]
    pub max: Option<f64>,
}

/// Arguments of #[transform(...)]
#[derive(Debug, Default, FromMeta)]
pub struct TransformArgs {
    #[darling(default)]
    pub name: Option<String>,
}

pub fn parse_contract_args(input: &DeriveInput) -> darling::Result<ContractArgs> {
    ContractArgs::from_attributes(&input.attrs)
}

pub fn parse_fields(input: &DeriveInput) -> darling::Result<Vec<ContractField>> {
    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            Fields::Unit => return Ok(Vec::new()),
            Fields::Unnamed(_) => {
                return Err(darling::Error::custom("Contract requires named fields").with_span(&input.ident))
            }
        },
        _ => return Err(darling::Error::custom("Contract can only be derived for structs").with_span(&input.ident)),
    };

    fields.iter().map(ContractField::from_field).collect()
}

/// Map a Rust field type to a field kind name and whether the field is required
pub fn classify(ty: &Type) -> (&'static str, bool) {
    match option_inner(ty) {
        Some(inner) => (kind_name(inner), false),
        None => (kind_name(ty), true),
    }
}

fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    first_type_argument(&segment.arguments)
}

fn first_type_argument(arguments: &PathArguments) -> Option<&Type> {
    let PathArguments::AngleBracketed(args) = arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
    })
}

fn kind_name(ty: &Type) -> &'static str {
    match ty {
        Type::Reference(r) => kind_name(&r.elem),
        Type::Paren(p) => kind_name(&p.elem),
        Type::Array(_) | Type::Slice(_) => "Array",
        Type::Tuple(t) if t.elems.is_empty() => "Any",
        Type::Tuple(_) => "Array",
        Type::Path(path) => {
            let Some(segment) = path.path.segments.last() else {
                return "Any";
            };
            match segment.ident.to_string().as_str() {
                "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64" | "u128"
                | "usize" => "Integer",
                "f32" | "f64" => "Float",
                "String" | "str" | "char" => "String",
                "bool" => "Boolean",
                "Vec" | "VecDeque" | "HashSet" | "BTreeSet" => "Array",
                "HashMap" | "BTreeMap" | "Map" => "Object",
                "Box" | "Arc" | "Rc" => first_type_argument(&segment.arguments).map_or("Any", kind_name),
                _ => "Any",
            }
        }
        _ => "Any",
    }
}

/// True when the return type is spelled `Result<..>` or `anyhow::Result<..>`
pub fn returns_result(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|s| s.ident == "Result"),
        _ => false,
    }
}
