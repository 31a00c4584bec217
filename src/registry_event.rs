/// Events emitted by the registry during operations.
///
/// These events are passed to the tracing callback set via
/// [`Registry::set_trace_callback`](crate::Registry::set_trace_callback).
/// The `Clone` derive allows callbacks to store or forward events if needed.
///
/// # Examples
///
/// ```rust
/// use singletn::RegistryEvent;
///
/// let event = RegistryEvent::Create { type_name: "Counter" };
/// assert_eq!(event.to_string(), "create { type_name: Counter }");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A container was constructed and registered on first lookup.
    Create {
        /// The type name of the container
        type_name: &'static str,
    },

    /// A container was looked up.
    Find {
        /// The type name that was requested
        type_name: &'static str,
        /// Whether an instance already existed
        found: bool,
    },

    /// A container was removed from the registry and destroyed.
    Delete {
        /// The type name of the destroyed container
        type_name: &'static str,
    },

    /// Every container was destroyed and the registry emptied.
    Clear {},
}

impl std::fmt::Display for RegistryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryEvent::Create { type_name } => {
                write!(f, "create {{ type_name: {} }}", type_name)
            }
            RegistryEvent::Find { type_name, found } => {
                write!(f, "find {{ type_name: {}, found: {} }}", type_name, found)
            }
            RegistryEvent::Delete { type_name } => {
                write!(f, "delete {{ type_name: {} }}", type_name)
            }
            RegistryEvent::Clear {} => write!(f, "Clearing the Registry"),
        }
    }
}
