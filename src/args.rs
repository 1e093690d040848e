/// An argument list passed to a memoized function.
///
/// Memoized functions take their arguments as a tuple, so `fn(u32, &str)`
/// becomes a closure over `(u32, String)` and a single argument is written
/// `(x,)`. The default cache key is the first element; the unit list `()`
/// keys every call on `()`.
pub trait Arguments {
    type First;

    fn first(&self) -> &Self::First;
}

impl Arguments for () {
    type First = ();

    fn first(&self) -> &() {
        self
    }
}

macro_rules! impl_arguments {
    ($first:ident $(, $rest:ident)*) => {
        impl<$first $(, $rest)*> Arguments for ($first, $($rest,)*) {
            type First = $first;

            fn first(&self) -> &$first {
                &self.0
            }
        }
    };
}

impl_arguments!(T1);
impl_arguments!(T1, T2);
impl_arguments!(T1, T2, T3);
impl_arguments!(T1, T2, T3, T4);
impl_arguments!(T1, T2, T3, T4, T5);
impl_arguments!(T1, T2, T3, T4, T5, T6);
impl_arguments!(T1, T2, T3, T4, T5, T6, T7);
impl_arguments!(T1, T2, T3, T4, T5, T6, T7, T8);
