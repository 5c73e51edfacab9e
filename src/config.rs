//! Fixed vs. dynamic node configuration.
//!
//! Every node is constructed from either a literal parameter struct or a
//! provider closure over the current [`Scope`]. That single distinction is
//! the load-bearing decision for every downstream cache in the engine: a
//! literal config can never change between visits, so anything derived from
//! it may be memoized; a provider is assumed to yield a different value every
//! visit and poisons caching for the whole subtree beneath it.

use crate::scope::Scope;
use std::fmt;
use std::rc::Rc;

/// The parameter source for one node: a constant or a per-visit provider.
///
/// Construct the fixed form with `From`/`Into` (every node constructor in
/// [`dsl`](crate::dsl) takes `impl Into<Config<P>>`, so a bare parameter
/// struct just works) and the dynamic form with [`Config::dynamic`]:
///
/// ```
/// use phalanx::config::Config;
/// use phalanx::dsl::RotateParams;
/// use phalanx::Vec3;
///
/// // Fixed: resolved once, derived matrices cached across visits.
/// let fixed: Config<RotateParams> = RotateParams::about(Vec3::Y, 30.0).into();
/// assert!(fixed.is_fixed());
///
/// // Dynamic: re-resolved every visit, nothing below it may cache.
/// let spinning = Config::dynamic(|scope| {
///     let angle = scope.get("angle").and_then(|v| v.as_f32()).unwrap_or(0.0);
///     RotateParams::about(Vec3::Y, angle)
/// });
/// assert!(!spinning.is_fixed());
/// ```
#[derive(Clone)]
pub enum Config<P> {
    /// A literal parameter object. Safe to cache results derived from it.
    Fixed(P),
    /// A provider evaluated against the scope on every visit.
    Dynamic(Rc<dyn Fn(&Scope) -> P>),
}

impl<P: Clone> Config<P> {
    /// Wraps a provider closure.
    pub fn dynamic(provider: impl Fn(&Scope) -> P + 'static) -> Self {
        Config::Dynamic(Rc::new(provider))
    }

    /// True iff this node was configured with a literal object.
    ///
    /// This is not a performance hint: it is the conservative purity proof
    /// the memoization protocol relies on for correctness.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Config::Fixed(_))
    }

    /// Produces the parameters for this visit.
    pub fn resolve(&self, scope: &Scope) -> P {
        match self {
            Config::Fixed(p) => p.clone(),
            Config::Dynamic(f) => f(scope),
        }
    }
}

impl<P> From<P> for Config<P> {
    fn from(params: P) -> Self {
        Config::Fixed(params)
    }
}

impl<P: fmt::Debug> fmt::Debug for Config<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Config::Fixed(p) => f.debug_tuple("Fixed").field(p).finish(),
            Config::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}
