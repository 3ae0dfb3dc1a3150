//! Function identity.
//!
//! An [`ActionFn`] is a shared callable that remembers which function it was
//! derived from. Two wrappers built around the same original (a retry
//! wrapper, a logging wrapper, a re-created closure around a stored handler)
//! are recognized as the same logical action by [`ActionFn::same_action`].
//!
//! Identity is the identity of the shared allocation: clones of an `ActionFn`
//! are the same function, two separately constructed closures are not, even if
//! their code is identical.

use std::fmt;
use std::sync::Arc;

type Func<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// A callable with an optional back-reference to its original.
pub struct ActionFn<A, R> {
    func: Func<A, R>,
    original: Option<Func<A, R>>,
}

impl<A, R> Clone for ActionFn<A, R> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
            original: self.original.clone(),
        }
    }
}

impl<A: 'static, R: 'static> ActionFn<A, R> {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            original: None,
        }
    }

    pub fn call(&self, args: A) -> R {
        (self.func)(args)
    }

    /// Whether both handles point at the same function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }

    /// Whether both handles unwrap to the same function.
    pub fn same_action(&self, other: &Self) -> bool {
        unwrap_fn(self).ptr_eq(&unwrap_fn(other))
    }
}

impl<A, R> fmt::Debug for ActionFn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionFn")
            .field("func", &Arc::as_ptr(&self.func).cast::<()>())
            .field("wrapped", &self.original.is_some())
            .finish()
    }
}

/// Build a wrapper around `original` with `make_wrapper` and stamp it with
/// the original.
///
/// Wrapping an already wrapped function stamps the innermost original, so
/// [`unwrap_fn`] always lands on an unwrapped function.
pub fn wrap_fn<A, R, W, G>(original: &ActionFn<A, R>, make_wrapper: W) -> ActionFn<A, R>
where
    A: 'static,
    R: 'static,
    W: FnOnce(ActionFn<A, R>) -> G,
    G: Fn(A) -> R + Send + Sync + 'static,
{
    let root = unwrap_fn(original).func;
    ActionFn {
        func: Arc::new(make_wrapper(original.clone())),
        original: Some(root),
    }
}

/// The original behind `f`, or `f` itself if it was never wrapped.
pub fn unwrap_fn<A, R>(f: &ActionFn<A, R>) -> ActionFn<A, R> {
    match &f.original {
        Some(original) => ActionFn {
            func: Arc::clone(original),
            original: None,
        },
        None => f.clone(),
    }
}

pub fn is_wrapped_fn<A, R>(f: &ActionFn<A, R>) -> bool {
    f.original.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double() -> ActionFn<i32, i32> {
        ActionFn::new(|x: i32| x * 2)
    }

    #[test]
    fn unwrap_of_wrap_is_the_original() {
        let f = double();
        let wrapped = wrap_fn(&f, |inner| move |x| inner.call(x) + 1);

        assert_eq!(wrapped.call(3), 7);
        assert!(is_wrapped_fn(&wrapped));
        assert!(unwrap_fn(&wrapped).ptr_eq(&f));
    }

    #[test]
    fn unwrap_of_unwrapped_is_a_no_op() {
        let f = double();
        assert!(!is_wrapped_fn(&f));
        assert!(unwrap_fn(&f).ptr_eq(&f));
        assert!(unwrap_fn(&unwrap_fn(&f)).ptr_eq(&f));
    }

    #[test]
    fn double_wrapping_keeps_the_root() {
        let f = double();
        let once = wrap_fn(&f, |inner| move |x| inner.call(x));
        let twice = wrap_fn(&once, |inner| move |x| inner.call(x) - 1);

        assert_eq!(twice.call(2), 3);
        assert!(unwrap_fn(&twice).ptr_eq(&f));
        assert!(!is_wrapped_fn(&unwrap_fn(&twice)));
    }

    #[test]
    fn separately_built_wrappers_are_the_same_action() {
        let f = double();
        let a = wrap_fn(&f, |inner| move |x| inner.call(x));
        let b = wrap_fn(&f, |inner| move |x| inner.call(x));

        assert!(!a.ptr_eq(&b));
        assert!(a.same_action(&b));
        assert!(!a.same_action(&double()));
    }
}
