//! Bitmask newtypes shared by the plugin model and the native ABI.

/// Declares a `u32` bitmask newtype with named constants and set operations.
macro_rules! bitmask {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$cmeta:meta])* const $flag:ident = $value:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        $vis struct $name(u32);

        impl $name {
            $( $(#[$cmeta])* pub const $flag: Self = Self($value); )*

            #[inline]
            pub const fn empty() -> Self {
                Self(0)
            }

            #[inline]
            pub const fn from_bits(bits: u32) -> Self {
                Self(bits)
            }

            #[inline]
            pub const fn bits(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            #[inline]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            #[inline]
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            #[inline]
            pub fn set(&mut self, other: Self, enabled: bool) {
                if enabled {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            #[inline]
            pub const fn without(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            #[inline]
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = Self;

            #[inline]
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }
    };
}

bitmask! {
    /// Capabilities of a loaded plugin. Some are declared by the plugin, the
    /// `CAN_*` ones are derived by the host from the audio port layout.
    pub struct PluginHints {
        const IS_BRIDGE = 0x001;
        const IS_RTSAFE = 0x002;
        const IS_SYNTH = 0x004;
        const HAS_CUSTOM_UI = 0x008;
        const CAN_DRYWET = 0x010;
        const CAN_VOLUME = 0x020;
        const CAN_BALANCE = 0x040;
        const NEEDS_FIXED_BUFFERS = 0x080;
        const USES_TIME = 0x100;
        const USES_CHUNKS = 0x200;
        const HAS_UI_BRIDGE = 0x400;
        const CAN_FORCE_STEREO = 0x800;
    }
}

bitmask! {
    /// Host-side behavior switches, set per instance.
    pub struct PluginOptions {
        const FIXED_BUFFERS = 0x001;
        const FORCE_STEREO = 0x002;
        const MAP_PROGRAM_CHANGES = 0x004;
        const USE_CHUNKS = 0x008;
        const SEND_CONTROL_CHANGES = 0x010;
        const SEND_CHANNEL_PRESSURE = 0x020;
        const SEND_NOTE_AFTERTOUCH = 0x040;
        const SEND_PITCHBEND = 0x080;
        const SEND_ALL_SOUND_OFF = 0x100;
        const SEND_PROGRAM_CHANGES = 0x200;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmask_set_operations() {
        let mut hints = PluginHints::CAN_DRYWET | PluginHints::CAN_VOLUME;
        assert!(hints.contains(PluginHints::CAN_DRYWET));
        assert!(!hints.contains(PluginHints::CAN_DRYWET | PluginHints::CAN_BALANCE));
        assert!(hints.intersects(PluginHints::CAN_DRYWET | PluginHints::CAN_BALANCE));

        hints.remove(PluginHints::CAN_DRYWET);
        assert!(!hints.contains(PluginHints::CAN_DRYWET));

        hints.set(PluginHints::CAN_BALANCE, true);
        assert_eq!(
            hints.bits(),
            PluginHints::CAN_VOLUME.bits() | PluginHints::CAN_BALANCE.bits()
        );
        assert!(PluginHints::empty().is_empty());
    }

    #[test]
    fn test_options_serialize_as_plain_integer() {
        let options = PluginOptions::FORCE_STEREO | PluginOptions::SEND_ALL_SOUND_OFF;
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(json, "258");
        let back: PluginOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }
}
