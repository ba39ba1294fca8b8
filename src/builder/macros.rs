//! Macros for ergonomic transition-map construction.

/// Build a [`TransitionMap`](crate::core::TransitionMap) from `name => entry` pairs.
///
/// A plain string literal on the right-hand side is shorthand for a move to that
/// state; anything else must evaluate to a
/// [`TransitionEntry`](crate::core::TransitionEntry).
///
/// # Example
///
/// ```
/// use flowstate::builder::TransitionBuilder;
/// use flowstate::transition_map;
///
/// let map = transition_map! {
///     "open" => "detail",
///     "close" => TransitionBuilder::new().to("list").discard().build().unwrap(),
/// };
///
/// assert_eq!(map.get("open").and_then(|e| e.target()), Some("detail"));
/// assert!(map.get("close").map(|e| e.is_discard()).unwrap_or(false));
/// ```
#[macro_export]
macro_rules! transition_map {
    () => {
        $crate::core::TransitionMap::new()
    };
    ( $( $name:literal => $entry:expr ),+ $(,)? ) => {{
        let mut map = $crate::core::TransitionMap::new();
        $(
            map.insert($name, $crate::builder::IntoTransitionEntry::into_entry($entry));
        )+
        map
    }};
}
