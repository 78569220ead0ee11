// Actor and action flag sets used by the stage registry

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Role category permitted to act on a stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumIter, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum ActorRole {
    Client,
    Staff,
    Specialist,
    Admin,
    System,
}

/// Something an actor can do to a stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumIter, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum StageAction {
    Advance,
    Reject,
    RequestChanges,
    Cancel,
    Skip,
    MoveBack,
    ForceComplete,
}

impl StageAction {
    /// Actions reserved for administrators; never part of a stage's ordinary actions.
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            StageAction::Skip | StageAction::MoveBack | StageAction::ForceComplete
        )
    }
}

macro_rules! flag_set {
    ($(#[$meta:meta])* $set:ident, $flag:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $set(u8);

        impl $set {
            pub const EMPTY: $set = $set(0);

            pub const fn bits(&self) -> u8 {
                self.0
            }

            pub const fn from_bits(bits: u8) -> Self {
                $set(bits)
            }

            pub const fn of(flags: &[$flag]) -> Self {
                let mut bits = 0u8;
                let mut i = 0;
                while i < flags.len() {
                    bits |= 1 << (flags[i] as u8);
                    i += 1;
                }
                $set(bits)
            }

            pub fn all() -> Self {
                $flag::iter().collect()
            }

            pub const fn contains(&self, flag: $flag) -> bool {
                self.0 & (1 << (flag as u8)) != 0
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, flag: $flag) {
                self.0 |= 1 << (flag as u8);
            }

            pub fn iter(&self) -> impl Iterator<Item = $flag> + '_ {
                $flag::iter().filter(move |f| self.contains(*f))
            }
        }

        impl From<$flag> for $set {
            fn from(flag: $flag) -> Self {
                $set(1 << (flag as u8))
            }
        }

        impl FromIterator<$flag> for $set {
            fn from_iter<I: IntoIterator<Item = $flag>>(iter: I) -> Self {
                let mut set = $set::EMPTY;
                for flag in iter {
                    set.insert(flag);
                }
                set
            }
        }

        impl BitOr for $set {
            type Output = $set;
            fn bitor(self, rhs: $set) -> $set {
                $set(self.0 | rhs.0)
            }
        }

        impl BitOr<$flag> for $set {
            type Output = $set;
            fn bitor(self, rhs: $flag) -> $set {
                self | $set::from(rhs)
            }
        }

        impl BitOr for $flag {
            type Output = $set;
            fn bitor(self, rhs: $flag) -> $set {
                $set::from(self) | rhs
            }
        }

        impl BitOrAssign<$flag> for $set {
            fn bitor_assign(&mut self, rhs: $flag) {
                self.insert(rhs);
            }
        }

        impl fmt::Debug for $set {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_set().entries(self.iter()).finish()
            }
        }

        impl fmt::Display for $set {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_empty() {
                    return write!(f, "-");
                }
                let names: Vec<String> = self.iter().map(|flag| flag.to_string()).collect();
                write!(f, "{}", names.join("|"))
            }
        }
    };
}

flag_set!(
    /// Set of actor roles, e.g. who may advance a stage or who is notified.
    ActorSet,
    ActorRole
);

flag_set!(
    /// Set of actions available on a stage.
    ActionSet,
    StageAction
);
