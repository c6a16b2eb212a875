/// Builds an argument list from values convertible into [`Value`](crate::Value).
///
/// ```
/// let args = buscall::args!["hello", 5u32];
/// assert_eq!(buscall::Signature::of(&args).as_str(), "su");
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        ::std::vec![$($crate::Value::from($arg)),*]
    };
}
