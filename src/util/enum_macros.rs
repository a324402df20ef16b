/// Generates an enum over a BACnet value set that reserves a vendor range.
///
/// ASHRAE 135 enumerations routinely split their value space into named
/// standard values, a vendor-proprietary range, and reserved values. This
/// macro generates the enum with `Custom` and `Reserved` catch-all
/// variants so conversions from raw wire values are total: named values
/// map to their variant, values inside `$range` map to `Custom`, and
/// everything else maps to `Reserved`.
///
/// # Example
///
/// ```rust
/// use bacnet_core::generate_custom_enum;
///
/// generate_custom_enum! {
///     FanMode {
///         Off = 0,
///         Low = 1,
///         High = 2,
///     },
///     u16,
///     256..=511
/// }
///
/// assert_eq!(FanMode::from(1u16), FanMode::Low);
/// assert_eq!(u16::from(FanMode::High), 2);
/// if let FanMode::Custom(value) = FanMode::from(300u16) {
///     assert_eq!(value.value(), 300);
/// } else {
///     panic!("expected FanMode::Custom");
/// }
/// assert!(matches!(FanMode::from(600u16), FanMode::Reserved(_)));
/// ```
#[macro_export]
macro_rules! generate_custom_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident = $value:expr,)+ }, $unit:ident, $custom_range:expr) => {
        pastey::paste! {
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $name {
                $($variant,)*
                Custom( [<$name Value>] ),
                Reserved( [<$name Value>] ),
            }

            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct [<$name Value>] { value: $unit }

            impl [<$name Value>] {
                fn new(value: $unit) -> Self {
                    Self { value }
                }

                pub fn value(&self) -> $unit {
                    self.value
                }
            }

            impl core::fmt::Display for $name {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self {
                        $($name::$variant => write!(f, "{}", stringify!($variant)),)*
                        $name::Custom( value ) => write!(f, "Custom({})", value.value()),
                        $name::Reserved( value ) => write!(f, "Reserved({})", value.value()),
                    }
                }
            }

            impl From<$name> for $unit {
                fn from(value: $name) -> Self {
                    match value {
                        $($name::$variant => $value,)*
                        $name::Custom( value ) => value.value(),
                        $name::Reserved( value ) => value.value(),
                    }
                }
            }

            impl From<$unit> for $name {
                fn from(value: $unit) -> Self {
                    match value {
                        $($value => $name::$variant,)*
                        v if ($custom_range).contains(&v) => {
                            $name::Custom( [<$name Value>]::new(v) )
                        }
                        v => $name::Reserved( [<$name Value>]::new(v) ),
                    }
                }
            }
        }
    };
}
