#[macro_export]
macro_rules! str_err {
    ($obj:ident, $str:expr) => {{
        Err(ErrorCode::$obj($str.to_string()))
    }};
}

#[macro_export]
macro_rules! fmt_err {
    ($obj:ident, $($arg:tt)*) => {{
        Err(ErrorCode::$obj(format!($($arg)*)))
    }}
}

/// Returns early with the given error kind when the condition does not hold.
#[macro_export]
macro_rules! flow_ensure {
    ($cond:expr, $obj:ident, $($arg:tt)*) => {{
        if !$cond {
            return Err(ErrorCode::$obj(format!($($arg)*)));
        }
    }};
}
