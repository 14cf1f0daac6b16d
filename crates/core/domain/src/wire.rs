/// 定义带线协议编码的枚举。
///
/// 生成 `code()`、严格解码 `try_from_code()` 和宽松解码 `from_code()`；
/// 宽松解码把未知编码映射为 `Unspecified` 并记录告警。
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $label:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// 线协议编码。
            pub const fn code(self) -> i32 {
                match self {
                    $( Self::$variant => $code, )+
                }
            }

            /// 严格解码：未知编码返回 `None`。
            pub const fn try_from_code(code: i32) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// 宽松解码：未知编码返回 `Unspecified`。
            pub fn from_code(code: i32) -> Self {
                match Self::try_from_code(code) {
                    Some(value) => value,
                    None => {
                        tracing::warn!(
                            target: "reporting.domain",
                            kind = $label,
                            code,
                            "unknown_wire_code"
                        );
                        Self::Unspecified
                    }
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::Unspecified
            }
        }
    };
}
