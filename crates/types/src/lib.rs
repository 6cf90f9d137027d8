use std::cmp::Ordering;

/// Column type tags as stored on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TypeId {
    Int32,
    Float32,
    Char,
}

impl TypeId {
    pub fn to_u32(self) -> u32 {
        match self {
            TypeId::Int32 => 1,
            TypeId::Float32 => 2,
            TypeId::Char => 3,
        }
    }

    pub fn from_u32(raw: u32) -> Option<TypeId> {
        match raw {
            1 => Some(TypeId::Int32),
            2 => Some(TypeId::Float32),
            3 => Some(TypeId::Char),
            _ => None,
        }
    }
}

/// A single column value. `None` payloads are SQL NULL.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Field {
    Int32(Option<i32>),
    Float32(Option<f32>),
    Char(Option<String>),
}

impl Field {
    /// A NULL field of the given type.
    pub fn null(type_id: TypeId) -> Field {
        match type_id {
            TypeId::Int32 => Field::Int32(None),
            TypeId::Float32 => Field::Float32(None),
            TypeId::Char => Field::Char(None),
        }
    }

    pub fn type_id(&self) -> TypeId {
        match self {
            Field::Int32(_) => TypeId::Int32,
            Field::Float32(_) => TypeId::Float32,
            Field::Char(_) => TypeId::Char,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Field::Int32(v) => v.is_none(),
            Field::Float32(v) => v.is_none(),
            Field::Char(v) => v.is_none(),
        }
    }

    /// Ordering between two non-null fields of the same type.
    ///
    /// Cross-type comparisons and comparisons involving NULL yield `None`,
    /// so every `NULL op x` predicate evaluates to false.
    pub fn cmp_same_type(&self, other: &Field) -> Option<Ordering> {
        match (self, other) {
            (Field::Int32(Some(a)), Field::Int32(Some(b))) => Some(a.cmp(b)),
            (Field::Float32(Some(a)), Field::Float32(Some(b))) => a.partial_cmp(b),
            (Field::Char(Some(a)), Field::Char(Some(b))) => Some(a.as_bytes().cmp(b.as_bytes())),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &Field) -> Option<bool> {
        self.cmp_same_type(other).map(|ord| ord == Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn type_tags_round_trip() {
        for ty in [TypeId::Int32, TypeId::Float32, TypeId::Char] {
            assert_eq!(TypeId::from_u32(ty.to_u32()), Some(ty));
        }
        assert_eq!(TypeId::from_u32(0), None);
        assert_eq!(TypeId::from_u32(99), None);
    }

    #[test]
    fn comparisons_require_same_type() {
        assert_eq!(
            Field::Int32(Some(1)).cmp_same_type(&Field::Int32(Some(2))),
            Some(Less)
        );
        assert_eq!(
            Field::Char(Some("a".into())).cmp_same_type(&Field::Char(Some("a".into()))),
            Some(Equal)
        );
        assert_eq!(
            Field::Float32(Some(2.5)).cmp_same_type(&Field::Float32(Some(1.5))),
            Some(Greater)
        );
        assert_eq!(
            Field::Int32(Some(1)).cmp_same_type(&Field::Char(Some("1".into()))),
            None
        );
    }

    #[test]
    fn null_never_compares() {
        let null = Field::null(TypeId::Int32);
        assert!(null.is_null());
        assert_eq!(null.cmp_same_type(&Field::Int32(Some(1))), None);
        assert_eq!(Field::Int32(Some(1)).eq_same_type(&null), None);
        assert_eq!(null.eq_same_type(&null), None);
    }

    #[test]
    fn serde_round_trip_stability() {
        let fields = vec![
            Field::Int32(Some(-42)),
            Field::Float32(Some(2.5)),
            Field::Char(Some("Ada".into())),
            Field::Char(None),
        ];
        let json = serde_json::to_string(&fields).unwrap();
        let back: Vec<Field> = serde_json::from_str(&json).unwrap();
        assert_eq!(fields, back);
    }

    #[test]
    fn char_compares_stored_bytes() {
        let short = Field::Char(Some("ab".into()));
        let long = Field::Char(Some("abc".into()));
        assert_eq!(short.cmp_same_type(&long), Some(Less));
        assert_eq!(short.eq_same_type(&Field::Char(Some("ab".into()))), Some(true));
    }

    proptest! {
        #[test]
        fn int_order_is_antisymmetric(i in any::<i32>(), j in any::<i32>()) {
            let a = Field::Int32(Some(i));
            let b = Field::Int32(Some(j));
            let ord1 = a.cmp_same_type(&b).unwrap();
            let ord2 = b.cmp_same_type(&a).unwrap();
            prop_assert_eq!(ord1, ord2.reverse());
        }

        #[test]
        fn char_cmp_matches_byte_order(a in ".*", b in ".*") {
            let fa = Field::Char(Some(a.clone()));
            let fb = Field::Char(Some(b.clone()));
            prop_assert_eq!(fa.cmp_same_type(&fb), Some(a.as_bytes().cmp(b.as_bytes())));
        }
    }
}
