// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A macro to declare named, composable flag sets over an unsigned integer.
//!
//! Flags with a value of `0` are allowed and act as named aliases for the empty
//! set; they never show up in the `Debug` output of a non-empty set.

#[macro_export]
#[doc(hidden)]
macro_rules! cadence_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            /// An empty set of flags.
            pub const EMPTY: Self = Self { bits: 0 };

            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// Every named flag, in declaration order.
            const NAMED: &'static [(&'static str, $ty)] = &[
                $((stringify!($flag_name), $flag_value),)*
            ];

            /// Builds a set from raw bits, keeping unknown bits.
            pub const fn from_bits_retain(bits: $ty) -> Self {
                Self { bits }
            }

            /// Returns the raw bits of the set.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// Returns `true` if no bit is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// Returns `true` if all flags in `other` are set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// Returns `true` if any flag in `other` is set in `self`.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Sets the flags in `other`.
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Clears the flags in `other`.
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }

            /// Returns a copy with `other` set.
            #[must_use]
            #[allow(dead_code)]
            pub const fn with(mut self, other: Self) -> Self {
                self.bits |= other.bits;
                self
            }

            /// Iterates over the named, non-zero flags contained in `self`.
            pub fn iter_names(&self) -> impl Iterator<Item = (&'static str, Self)> + '_ {
                Self::NAMED
                    .iter()
                    .filter(move |(_, v)| *v != 0 && (self.bits & *v) == *v)
                    .map(|(n, v)| (*n, Self { bits: *v }))
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.bits |= other.bits;
            }
        }

        impl core::ops::Not for $name {
            type Output = Self;
            fn not(self) -> Self {
                Self { bits: !self.bits }
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if self.bits == 0 {
                    return write!(f, "{}(EMPTY)", stringify!($name));
                }
                let mut rest = self.bits;
                write!(f, "{}(", stringify!($name))?;
                let mut first = true;
                for (flag, value) in Self::NAMED {
                    if *value != 0 && (rest & *value) == *value {
                        if !first {
                            write!(f, " | ")?;
                        }
                        write!(f, "{flag}")?;
                        rest &= !*value;
                        first = false;
                    }
                }
                if rest != 0 {
                    if !first {
                        write!(f, " | ")?;
                    }
                    write!(f, "{rest:#x}")?;
                }
                write!(f, ")")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    cadence_bitflags! {
        /// Flags used to exercise the macro.
        pub struct TestFlags: u16 {
            const NONE = 0;
            const A = 1 << 0;
            const B = 1 << 1;
            const C = 1 << 2;
        }
    }

    #[test]
    fn test_empty_and_zero_alias() {
        let flags = TestFlags::NONE;
        assert!(flags.is_empty());
        assert_eq!(flags, TestFlags::EMPTY);
        assert_eq!(format!("{flags:?}"), "TestFlags(EMPTY)");
    }

    #[test]
    fn test_combination_and_debug() {
        let flags = TestFlags::A | TestFlags::C;
        assert!(flags.contains(TestFlags::A));
        assert!(!flags.contains(TestFlags::B));
        assert!(flags.intersects(TestFlags::C | TestFlags::B));
        assert_eq!(format!("{flags:?}"), "TestFlags(A | C)");
    }

    #[test]
    fn test_insert_remove() {
        let mut flags = TestFlags::EMPTY;
        flags.insert(TestFlags::B);
        flags |= TestFlags::A;
        assert_eq!(flags.bits(), 0b011);
        flags.remove(TestFlags::A);
        assert_eq!(flags, TestFlags::B);
    }

    #[test]
    fn test_with_returns_extended_copy() {
        let base = TestFlags::A;
        let extended = base.with(TestFlags::C);
        assert_eq!(base, TestFlags::A);
        assert_eq!(extended, TestFlags::A | TestFlags::C);
    }

    #[test]
    fn test_unknown_bits_are_kept() {
        let flags = TestFlags::from_bits_retain(0b1001);
        assert!(flags.contains(TestFlags::A));
        assert_eq!(format!("{flags:?}"), "TestFlags(A | 0x8)");
    }

    #[test]
    fn test_iter_names_skips_zero_flags() {
        let names: Vec<_> = (TestFlags::A | TestFlags::B)
            .iter_names()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
