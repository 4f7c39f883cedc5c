//! Access flag rules, by class file version
//!
//! Each table is a list of brackets sorted by the major version they start applying at. The
//! bracket used for a class is the last one whose `since` is not newer than the class version.

use crate::jvm::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use bitflags::Flags;

macro_rules! flags {
    ($ty:ident: $($flag:ident)|*) => {
        $ty::empty()$(.union($ty::$flag))*
    };
}

/// Constraints on the access flags of one kind of entity, from some version on
#[derive(Debug)]
pub struct ModifierRule<F: 'static> {
    /// First major version the rule applies to
    pub since: u16,

    /// All of these must be set
    pub required: F,

    /// None of these may be set
    pub forbidden: F,

    /// Groups of flags of which at most one may be set
    pub at_most_one: &'static [F],

    /// Groups of flags of which exactly one must be set
    pub exactly_one: &'static [F],

    /// When all of the first flags are set, none of the second may be
    pub exclusions: &'static [(F, F)],
}

impl<F: Flags<Bits = u16> + Copy + 'static> ModifierRule<F> {
    pub fn allows(&self, flags: F) -> bool {
        let bits = flags.bits();
        let required = self.required.bits();
        bits & required == required
            && bits & self.forbidden.bits() == 0
            && self
                .at_most_one
                .iter()
                .all(|group| (bits & group.bits()).count_ones() <= 1)
            && self
                .exactly_one
                .iter()
                .all(|group| (bits & group.bits()).count_ones() == 1)
            && self.exclusions.iter().all(|(when, then)| {
                bits & when.bits() != when.bits() || bits & then.bits() == 0
            })
    }
}

/// Pick the bracket that applies to a major version
pub fn bracket<F: 'static>(
    rules: &'static [ModifierRule<F>],
    major_version: u16,
) -> &'static ModifierRule<F> {
    rules
        .iter()
        .rev()
        .find(|rule| rule.since <= major_version)
        .unwrap_or(&rules[0])
}

const METHOD_VISIBILITY: MethodAccessFlags =
    flags!(MethodAccessFlags: PUBLIC | PRIVATE | PROTECTED);
const FIELD_VISIBILITY: FieldAccessFlags = flags!(FieldAccessFlags: PUBLIC | PRIVATE | PROTECTED);

/// Methods of classes
pub const CLASS_METHOD_RULES: &[ModifierRule<MethodAccessFlags>] = &[
    ModifierRule {
        since: 45,
        required: MethodAccessFlags::empty(),
        forbidden: MethodAccessFlags::empty(),
        at_most_one: &[METHOD_VISIBILITY],
        exactly_one: &[],
        exclusions: &[(
            MethodAccessFlags::ABSTRACT,
            flags!(MethodAccessFlags: FINAL | NATIVE | PRIVATE | STATIC),
        )],
    },
    ModifierRule {
        since: 49,
        required: MethodAccessFlags::empty(),
        forbidden: MethodAccessFlags::empty(),
        at_most_one: &[METHOD_VISIBILITY],
        exactly_one: &[],
        exclusions: &[(
            MethodAccessFlags::ABSTRACT,
            flags!(MethodAccessFlags: FINAL | NATIVE | PRIVATE | STATIC | SYNCHRONIZED | STRICT),
        )],
    },
    // `ACC_STRICT` is unassigned from 17 on
    ModifierRule {
        since: 61,
        required: MethodAccessFlags::empty(),
        forbidden: MethodAccessFlags::empty(),
        at_most_one: &[METHOD_VISIBILITY],
        exactly_one: &[],
        exclusions: &[(
            MethodAccessFlags::ABSTRACT,
            flags!(MethodAccessFlags: FINAL | NATIVE | PRIVATE | STATIC | SYNCHRONIZED),
        )],
    },
];

/// Methods of interfaces
pub const INTERFACE_METHOD_RULES: &[ModifierRule<MethodAccessFlags>] = &[
    ModifierRule {
        since: 45,
        required: flags!(MethodAccessFlags: PUBLIC | ABSTRACT),
        forbidden: flags!(MethodAccessFlags: STATIC | FINAL | NATIVE),
        at_most_one: &[],
        exactly_one: &[],
        exclusions: &[],
    },
    ModifierRule {
        since: 49,
        required: flags!(MethodAccessFlags: PUBLIC | ABSTRACT),
        forbidden: flags!(
            MethodAccessFlags: PRIVATE | PROTECTED | STATIC | FINAL | SYNCHRONIZED | NATIVE | STRICT
        ),
        at_most_one: &[],
        exactly_one: &[],
        exclusions: &[],
    },
    // Default, static, and private interface methods
    ModifierRule {
        since: 52,
        required: MethodAccessFlags::empty(),
        forbidden: flags!(MethodAccessFlags: PROTECTED | FINAL | SYNCHRONIZED | NATIVE),
        at_most_one: &[],
        exactly_one: &[flags!(MethodAccessFlags: PUBLIC | PRIVATE)],
        exclusions: &[(
            MethodAccessFlags::ABSTRACT,
            flags!(MethodAccessFlags: PRIVATE | STATIC | STRICT),
        )],
    },
    ModifierRule {
        since: 61,
        required: MethodAccessFlags::empty(),
        forbidden: flags!(MethodAccessFlags: PROTECTED | FINAL | SYNCHRONIZED | NATIVE),
        at_most_one: &[],
        exactly_one: &[flags!(MethodAccessFlags: PUBLIC | PRIVATE)],
        exclusions: &[(
            MethodAccessFlags::ABSTRACT,
            flags!(MethodAccessFlags: PRIVATE | STATIC),
        )],
    },
];

/// Extra constraints on instance initialization methods (`<init>`)
pub const INIT_METHOD_RULES: &[ModifierRule<MethodAccessFlags>] = &[
    ModifierRule {
        since: 45,
        required: MethodAccessFlags::empty(),
        forbidden: flags!(MethodAccessFlags: STATIC | FINAL | SYNCHRONIZED | NATIVE | ABSTRACT),
        at_most_one: &[],
        exactly_one: &[],
        exclusions: &[],
    },
    ModifierRule {
        since: 49,
        required: MethodAccessFlags::empty(),
        forbidden: flags!(
            MethodAccessFlags: STATIC | FINAL | SYNCHRONIZED | NATIVE | ABSTRACT | BRIDGE
        ),
        at_most_one: &[],
        exactly_one: &[],
        exclusions: &[],
    },
];

/// Fields of classes
pub const CLASS_FIELD_RULES: &[ModifierRule<FieldAccessFlags>] = &[
    ModifierRule {
        since: 45,
        required: FieldAccessFlags::empty(),
        forbidden: FieldAccessFlags::empty(),
        at_most_one: &[
            FIELD_VISIBILITY,
            flags!(FieldAccessFlags: FINAL | VOLATILE),
        ],
        exactly_one: &[],
        exclusions: &[],
    },
];

/// Fields of interfaces
pub const INTERFACE_FIELD_RULES: &[ModifierRule<FieldAccessFlags>] = &[
    ModifierRule {
        since: 45,
        required: flags!(FieldAccessFlags: PUBLIC | STATIC | FINAL),
        forbidden: flags!(FieldAccessFlags: PRIVATE | PROTECTED | VOLATILE | TRANSIENT),
        at_most_one: &[],
        exactly_one: &[],
        exclusions: &[],
    },
    ModifierRule {
        since: 49,
        required: flags!(FieldAccessFlags: PUBLIC | STATIC | FINAL),
        forbidden: flags!(FieldAccessFlags: PRIVATE | PROTECTED | VOLATILE | TRANSIENT | ENUM),
        at_most_one: &[],
        exactly_one: &[],
        exclusions: &[],
    },
];

/// Classes (not interfaces)
pub const CLASS_RULES: &[ModifierRule<ClassAccessFlags>] = &[
    ModifierRule {
        since: 45,
        required: ClassAccessFlags::empty(),
        forbidden: ClassAccessFlags::MODULE,
        at_most_one: &[flags!(ClassAccessFlags: FINAL | ABSTRACT)],
        exactly_one: &[],
        exclusions: &[],
    },
    ModifierRule {
        since: 49,
        required: ClassAccessFlags::empty(),
        forbidden: flags!(ClassAccessFlags: MODULE | ANNOTATION),
        at_most_one: &[flags!(ClassAccessFlags: FINAL | ABSTRACT)],
        exactly_one: &[],
        exclusions: &[],
    },
];

/// Interfaces (`ACC_ABSTRACT` is implied before 50)
pub const INTERFACE_RULES: &[ModifierRule<ClassAccessFlags>] = &[
    ModifierRule {
        since: 45,
        required: ClassAccessFlags::ABSTRACT,
        forbidden: flags!(ClassAccessFlags: FINAL | MODULE),
        at_most_one: &[],
        exactly_one: &[],
        exclusions: &[],
    },
    ModifierRule {
        since: 49,
        required: ClassAccessFlags::ABSTRACT,
        forbidden: flags!(ClassAccessFlags: FINAL | MODULE | SUPER | ENUM),
        at_most_one: &[],
        exactly_one: &[],
        exclusions: &[],
    },
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn latest_bracket_wins() {
        assert_eq!(bracket(CLASS_METHOD_RULES, 45).since, 45);
        assert_eq!(bracket(CLASS_METHOD_RULES, 48).since, 45);
        assert_eq!(bracket(CLASS_METHOD_RULES, 60).since, 49);
        assert_eq!(bracket(CLASS_METHOD_RULES, 61).since, 61);
        assert_eq!(bracket(INTERFACE_METHOD_RULES, 52).since, 52);
        assert_eq!(bracket(INTERFACE_METHOD_RULES, 65).since, 61);
        assert_eq!(bracket(CLASS_FIELD_RULES, 65).since, 45);
    }

    #[test]
    fn abstract_strict_methods() {
        let flags =
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT | MethodAccessFlags::STRICT;
        assert!(bracket(CLASS_METHOD_RULES, 48).allows(flags));
        assert!(!bracket(CLASS_METHOD_RULES, 60).allows(flags));
        assert!(bracket(CLASS_METHOD_RULES, 61).allows(flags));
        assert!(!bracket(INTERFACE_METHOD_RULES, 60).allows(flags));
        assert!(bracket(INTERFACE_METHOD_RULES, 61).allows(flags));
    }

    #[test]
    fn visibility() {
        let both = MethodAccessFlags::PUBLIC | MethodAccessFlags::PRIVATE;
        assert!(!bracket(CLASS_METHOD_RULES, 52).allows(both));
        assert!(bracket(CLASS_METHOD_RULES, 52).allows(MethodAccessFlags::empty()));

        // Interface methods need exactly one of public or private from 8 on
        assert!(!bracket(INTERFACE_METHOD_RULES, 52).allows(MethodAccessFlags::STATIC));
        assert!(bracket(INTERFACE_METHOD_RULES, 52)
            .allows(MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC));
        assert!(!bracket(INTERFACE_METHOD_RULES, 51)
            .allows(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC));
    }

    #[test]
    fn fields_and_classes() {
        let constant =
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
        assert!(bracket(INTERFACE_FIELD_RULES, 52).allows(constant));
        assert!(!bracket(INTERFACE_FIELD_RULES, 52).allows(FieldAccessFlags::PUBLIC));
        assert!(!bracket(CLASS_FIELD_RULES, 52)
            .allows(FieldAccessFlags::FINAL | FieldAccessFlags::VOLATILE));

        let abstract_final = ClassAccessFlags::ABSTRACT | ClassAccessFlags::FINAL;
        assert!(!bracket(CLASS_RULES, 52).allows(abstract_final));
        assert!(!bracket(CLASS_RULES, 52).allows(ClassAccessFlags::ANNOTATION));
        assert!(bracket(CLASS_RULES, 48).allows(ClassAccessFlags::ANNOTATION));
        let interface = ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        assert!(bracket(INTERFACE_RULES, 52).allows(interface));
        assert!(!bracket(INTERFACE_RULES, 52).allows(interface | ClassAccessFlags::SUPER));
        assert!(bracket(INTERFACE_RULES, 48).allows(interface | ClassAccessFlags::SUPER));
    }
}
