use hashbrown::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::archive::{Archivable, Archive};
use crate::error::Result;

/// Registry of exposed methods, keyed by signature. Entries share ownership
/// of their functors, and the functors share ownership of their targets.
pub type FunctorMap = HashMap<String, Arc<dyn AbstractFunctor>>;

/// A bound method: applies itself to a target instance with an argument
/// tuple. Implemented for plain functions and closures of each arity, which
/// is how method references like `Foo::set_name` come in.
pub trait Method<K, A, R>: Send + Sync + 'static {
    fn apply(&self, instance: &mut K, args: A) -> R;
}

macro_rules! impl_method {
    ($($field:tt $param:ident),*) => {
        impl<K, R, F, $($param,)*> Method<K, ($($param,)*), R> for F
        where
            F: Fn(&mut K, $($param),*) -> R + Send + Sync + 'static,
        {
            #[inline]
            #[allow(unused_variables)]
            fn apply(&self, instance: &mut K, args: ($($param,)*)) -> R {
                self(instance, $(args.$field),*)
            }
        }
    };
}

impl_method!();
impl_method!(0 P1);
impl_method!(0 P1, 1 P2);
impl_method!(0 P1, 1 P2, 2 P3);
impl_method!(0 P1, 1 P2, 2 P3, 3 P4);
impl_method!(0 P1, 1 P2, 2 P3, 3 P4, 4 P5);
impl_method!(0 P1, 1 P2, 2 P3, 3 P4, 4 P5, 5 P6);

/// The type-erased face of a bound method: arguments in, result out, both
/// as archives.
pub trait AbstractFunctor: Send + Sync {
    /// Decodes the argument tuple off `args`, invokes the bound method and
    /// returns the encoded result.
    fn invoke(&self, args: &mut Archive) -> Result<Archive>;
}

impl dyn AbstractFunctor {
    /// Typed invocation through the wire encoding: packs `args`, dispatches,
    /// unpacks the result.
    pub fn invoke_typed<A, R>(&self, args: &A) -> Result<R>
    where
        A: Archivable,
        R: Archivable + Default,
    {
        let mut parameters = Archive::new();
        parameters.pack(args);

        let mut result = self.invoke(&mut parameters)?;
        result.unpack()
    }
}

/// Binds a shared target instance to one of its methods. The registry and
/// any in-flight invocation keep the target alive.
pub struct Functor<K, M, A, R> {
    instance: Arc<Mutex<K>>,
    method: M,
    marker: PhantomData<fn(A) -> R>,
}

impl<K, M, A, R> Functor<K, M, A, R>
where
    M: Method<K, A, R>,
{
    /// Direct typed invocation, bypassing the archive.
    pub fn call(&self, args: A) -> R {
        let mut instance = self.instance.lock().unwrap();
        self.method.apply(&mut *instance, args)
    }
}

impl<K, M, A, R> AbstractFunctor for Functor<K, M, A, R>
where
    K: Send + 'static,
    M: Method<K, A, R>,
    A: Archivable + Default + Send + 'static,
    R: Archivable + Send + 'static,
{
    fn invoke(&self, args: &mut Archive) -> Result<Archive> {
        let mut parameters = A::default();
        args.transform(&mut parameters)?;

        let result = self.call(parameters);

        let mut reply = Archive::new();
        reply.append(&result);

        Ok(reply)
    }
}

/// Binds `instance` to `method`. The return type must be archivable: a
/// status value is always on the wire.
pub fn make_functor<K, M, A, R>(instance: &Arc<Mutex<K>>, method: M) -> Functor<K, M, A, R>
where
    M: Method<K, A, R>,
{
    Functor {
        instance: Arc::clone(instance),
        method,
        marker: PhantomData,
    }
}
