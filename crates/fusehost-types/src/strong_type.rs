/// Declares a transparent newtype over a primitive id.
///
/// The generated type derives the usual value traits, serializes as its
/// inner value, derefs to it and converts both ways with `From`.
#[macro_export]
macro_rules! strong_type {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl ::std::ops::Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &$inner {
                &self.0
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(val: $inner) -> Self {
                Self(val)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(val: $name) -> Self {
                val.0
            }
        }
    };
}

#[cfg(test)]
mod tests {
    strong_type!(Probe, i32);

    #[test]
    fn test_strong_type_deref_and_convert() {
        let p = Probe(-3);
        assert_eq!(*p, -3);
        let raw: i32 = p.into();
        assert_eq!(raw, -3);
        assert_eq!(Probe::from(9), Probe(9));
    }

    #[test]
    fn test_strong_type_formatting() {
        assert_eq!(Probe(7).to_string(), "7");
        assert_eq!(format!("{:?}", Probe(7)), "Probe(7)");
    }

    #[test]
    fn test_strong_type_transparent_serde() {
        let json = serde_json::to_string(&Probe(42)).unwrap();
        assert_eq!(json, "42");
        let back: Probe = serde_json::from_str("-1").unwrap();
        assert_eq!(back, Probe(-1));
    }
}
