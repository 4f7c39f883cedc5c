use super::names::{BinaryName, Name};
use crate::util::Width;
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to and from string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string, rejecting leftover input
    fn parse(source: &str) -> Result<Self, String> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(ret),
            Some(c) => Err(format!("Unexpected leftover input '{}' in '{}'", c, source)),
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, String>;
}

/// Arrays may have at most this many dimensions
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Byte
            | BaseType::Char
            | BaseType::Float
            | BaseType::Int
            | BaseType::Short
            | BaseType::Boolean => 1,
            BaseType::Double | BaseType::Long => 2,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, String> {
        let typ = match source.next() {
            Some('B') => BaseType::Byte,
            Some('C') => BaseType::Char,
            Some('D') => BaseType::Double,
            Some('F') => BaseType::Float,
            Some('I') => BaseType::Int,
            Some('J') => BaseType::Long,
            Some('S') => BaseType::Short,
            Some('Z') => BaseType::Boolean,
            Some(c) => return Err(format!("Invalid base type character '{}'", c)),
            None => return Err(String::from("Missing base type character")),
        };
        Ok(typ)
    }
}

/// Reference type
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType<Class> {
    Object(Class),
    ObjectArray(ArrayType<Class>),
    PrimitiveArray(ArrayType<BaseType>),
}

/// Generic array type
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Additional dimensions (`A[]` has 0 additional dimensions, `A[][][][]` has 3)
    pub additional_dimensions: usize,

    /// Underlying element type (`A` is the underlying element type of `A[][]`)
    pub element_type: T,
}

impl<T> ArrayType<T> {
    pub fn map<T2>(&self, map_element: impl FnOnce(&T) -> T2) -> ArrayType<T2> {
        ArrayType {
            additional_dimensions: self.additional_dimensions,
            element_type: map_element(&self.element_type),
        }
    }

    /// Total number of dimensions in the array type
    ///
    /// This is always just `additional_dimensions + 1`
    pub const fn dimensions(&self) -> usize {
        self.additional_dimensions + 1
    }
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, write_to: &mut String) {
        for _ in 0..=self.additional_dimensions {
            write_to.push('[');
        }
        self.element_type.render_to(write_to);
    }
}

impl RenderDescriptor for BinaryName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self.as_str());
        write_to.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, String> {
        if let Some('L') = source.next() {
            let mut class_name = String::new();
            loop {
                let c: char = source
                    .next()
                    .ok_or_else(|| format!("Missing terminator for 'L{}'", class_name))?;
                if c == ';' {
                    return BinaryName::from_string(class_name);
                } else {
                    class_name.push(c)
                }
            }
        } else {
            Err(String::from("Expected object type to start with `L`"))
        }
    }
}

impl<C: RenderDescriptor> RenderDescriptor for RefType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => {
                cls.render_to(write_to);
            }
            RefType::PrimitiveArray(arr) => {
                arr.render_to(write_to);
            }
            RefType::ObjectArray(arr) => {
                arr.render_to(write_to);
            }
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for RefType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, String> {
        Ok(match source.peek().copied() {
            Some('L') => RefType::Object(C::parse_from(source)?),
            Some('[') => {
                source.next();
                let mut additional_dimensions = 0;
                while source.next_if_eq(&'[').is_some() {
                    additional_dimensions += 1;
                }
                if additional_dimensions >= MAX_ARRAY_DIMENSIONS {
                    return Err(format!(
                        "Array type has more than {} dimensions",
                        MAX_ARRAY_DIMENSIONS
                    ));
                }
                if let Some('L') = source.peek().copied() {
                    RefType::ObjectArray(ArrayType {
                        additional_dimensions,
                        element_type: C::parse_from(source)?,
                    })
                } else {
                    RefType::PrimitiveArray(ArrayType {
                        additional_dimensions,
                        element_type: BaseType::parse_from(source)?,
                    })
                }
            }
            Some(c) => return Err(format!("Invalid reference type character '{}'", c)),
            None => return Err(String::from("Missing field type")),
        })
    }
}

impl<C> RefType<C> {
    pub fn map<C2>(&self, map_class: impl FnOnce(&C) -> C2) -> RefType<C2> {
        match self {
            RefType::Object(cls) => RefType::Object(map_class(cls)),
            RefType::PrimitiveArray(arr) => RefType::PrimitiveArray(*arr),
            RefType::ObjectArray(arr) => RefType::ObjectArray(arr.map(map_class)),
        }
    }

    pub fn array(field_type: FieldType<C>) -> RefType<C> {
        match field_type {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(arr)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.additional_dimensions + 1,
                element_type: arr.element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(arr)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.additional_dimensions + 1,
                element_type: arr.element_type,
            }),
        }
    }

    /// Number of array dimensions (0 for non-array types)
    pub fn dimensions(&self) -> usize {
        match self {
            RefType::Object(_) => 0,
            RefType::PrimitiveArray(arr) => arr.dimensions(),
            RefType::ObjectArray(arr) => arr.dimensions(),
        }
    }
}

impl<C: Clone> RefType<C> {
    /// Type of the elements of an array type (`None` if this is not an array)
    pub fn component_type(&self) -> Option<FieldType<C>> {
        let component = match self {
            RefType::Object(_) => return None,
            RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }) => FieldType::Base(*element_type),
            RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }) => FieldType::Ref(RefType::Object(element_type.clone())),
            RefType::PrimitiveArray(arr) => FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.additional_dimensions - 1,
                element_type: arr.element_type,
            })),
            RefType::ObjectArray(arr) => FieldType::Ref(RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.additional_dimensions - 1,
                element_type: arr.element_type.clone(),
            })),
        };
        Some(component)
    }
}

impl RefType<BinaryName> {
    /// Interpret the name stored in a `CONSTANT_Class_info`
    ///
    /// This is usually a binary name, but array classes are named by their descriptor. See
    /// [this section of the JVMS][0] for more.
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4.1
    pub fn from_class_constant(name: &str) -> Result<RefType<BinaryName>, String> {
        if name.starts_with('[') {
            RefType::parse(name)
        } else {
            BinaryName::from_string(String::from(name)).map(RefType::Object)
        }
    }
}

/// Type of a class, instance, or local variable
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType<Class> {
    Base(BaseType),
    Ref(RefType<Class>),
}

impl<C> Width for FieldType<C> {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl<C> FieldType<C> {
    pub fn array(field_type: FieldType<C>) -> FieldType<C> {
        FieldType::Ref(RefType::array(field_type))
    }

    pub const fn object(class_name: C) -> FieldType<C> {
        FieldType::Ref(RefType::Object(class_name))
    }

    pub const fn int() -> FieldType<C> {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType<C> {
        FieldType::Base(BaseType::Long)
    }

    pub const fn float() -> FieldType<C> {
        FieldType::Base(BaseType::Float)
    }

    pub const fn double() -> FieldType<C> {
        FieldType::Base(BaseType::Double)
    }
}

impl<C: RenderDescriptor> RenderDescriptor for FieldType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(reference_type) => reference_type.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for FieldType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, String> {
        match source.peek().copied() {
            None => Err(String::from("Missing field type")),
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                BaseType::parse_from(source).map(FieldType::Base)
            }
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(c) => Err(format!("Invalid field type character '{}'", c)),
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor<Class> {
    pub parameters: Vec<FieldType<Class>>,
    pub return_type: Option<FieldType<Class>>, // `None` is for `void` (ie. no return)
}

impl<C> MethodDescriptor<C> {
    /// Total length of parameters (not the same as the length of the vector),
    /// which must be 255 or less for it to be valid
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_len = if has_this_param { 1 } else { 0 };
        this_len + self.parameters.iter().map(Width::width).sum::<usize>()
    }
}

impl<C: RenderDescriptor> RenderDescriptor for MethodDescriptor<C> {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl<C: ParseDescriptor> ParseDescriptor for MethodDescriptor<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, String> {
        if source.next_if_eq(&'(').is_none() {
            return Err(String::from("Expected '(' for method"));
        }

        let mut parameters = vec![];
        while source.next_if_eq(&')').is_none() {
            if source.peek().is_none() {
                return Err(String::from("Expected ')' for method"));
            }
            parameters.push(FieldType::<C>::parse_from(source)?);
        }

        let return_type = if source.next_if_eq(&'V').is_some() {
            None
        } else {
            Some(FieldType::<C>::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fmt::Debug;

    fn round_trip<T: RenderDescriptor + ParseDescriptor + Debug + Eq>(rendered: &str, parsed: T) {
        assert_eq!(rendered, parsed.render());
        assert_eq!(T::parse(rendered).unwrap(), parsed);
    }

    type FT = FieldType<BinaryName>;
    type MD = MethodDescriptor<BinaryName>;

    const INT: FT = FieldType::Base(BaseType::Int);
    const DOUBLE: FT = FieldType::Base(BaseType::Double);
    const OBJECT: FT = FieldType::object(BinaryName::OBJECT);
    const STRING: FT = FieldType::object(BinaryName::STRING);
    const INTEGER: FT = FieldType::object(BinaryName::INTEGER);

    #[test]
    fn field_types() {
        round_trip("I", INT);
        round_trip("Ljava/lang/Object;", OBJECT);
        round_trip(
            "[[[D",
            FieldType::array(FieldType::array(FieldType::array(DOUBLE))),
        );
        round_trip("[Ljava/lang/String;", FieldType::array(STRING));
    }

    #[test]
    fn method_descriptors() {
        let descriptor = MethodDescriptor {
            parameters: vec![INT, DOUBLE, INTEGER],
            return_type: Some(OBJECT),
        };
        assert_eq!(descriptor.parameter_length(true), 5);
        round_trip("(IDLjava/lang/Integer;)Ljava/lang/Object;", descriptor);
        round_trip(
            "()V",
            MethodDescriptor {
                parameters: Vec::<FT>::new(),
                return_type: None,
            },
        );
    }

    #[test]
    fn malformed_descriptors() {
        assert!(FT::parse("V").is_err());
        assert!(FT::parse("II").is_err());
        assert!(FT::parse("Ljava/lang/Object").is_err());
        assert!(FT::parse("L;").is_err());
        assert!(FT::parse("Ljava.lang.Object;").is_err());
        assert!(FT::parse("[").is_err());
        assert!(FT::parse(&format!("{}I", "[".repeat(256))).is_err());
        assert!(FT::parse(&format!("{}I", "[".repeat(255))).is_ok());
        assert!(MD::parse("(I").is_err());
        assert!(MD::parse("(V)V").is_err());
        assert!(MD::parse("()").is_err());
        assert!(MD::parse("()VV").is_err());
    }

    #[test]
    fn component_types() {
        let matrix = FT::parse("[[Ljava/lang/String;").unwrap();
        let row = match matrix {
            FieldType::Ref(ref_type) => ref_type.component_type().unwrap(),
            _ => panic!("Expected a reference type"),
        };
        assert_eq!(row, FieldType::array(STRING));
        assert_eq!(
            RefType::array(INT).component_type(),
            Some(FieldType::Base(BaseType::Int))
        );
        assert_eq!(RefType::Object(BinaryName::OBJECT).component_type(), None);
    }

    #[test]
    fn class_constant_names() {
        assert_eq!(
            RefType::from_class_constant("java/lang/String"),
            Ok(RefType::Object(BinaryName::STRING))
        );
        assert_eq!(
            RefType::from_class_constant("[I"),
            Ok(RefType::array(INT))
        );
        assert!(RefType::from_class_constant("[").is_err());
        assert!(RefType::from_class_constant("Ljava/lang/String;").is_err());
    }
}
