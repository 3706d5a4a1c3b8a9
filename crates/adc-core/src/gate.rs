use crate::session::SessionStore;
use crate::Destination;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow(Destination),
    Redirect(Destination),
}

impl GateDecision {
    /// Where the router ends up either way.
    pub fn destination(&self) -> &Destination {
        match self {
            GateDecision::Allow(destination) | GateDecision::Redirect(destination) => destination,
        }
    }

    pub fn into_destination(self) -> Destination {
        match self {
            GateDecision::Allow(destination) | GateDecision::Redirect(destination) => destination,
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, GateDecision::Redirect(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Send an authenticated user away from login/registration.
    pub redirect_authenticated_from_public: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            redirect_authenticated_from_public: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NavigationGate {
    policy: GatePolicy,
}

impl NavigationGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    pub fn evaluate(&self, destination: Destination, authenticated: bool) -> GateDecision {
        if destination.is_protected() {
            if authenticated {
                GateDecision::Allow(destination)
            } else {
                GateDecision::Redirect(Destination::Login)
            }
        } else if authenticated && self.policy.redirect_authenticated_from_public {
            GateDecision::Redirect(Destination::Dashboard)
        } else {
            GateDecision::Allow(destination)
        }
    }

    pub fn evaluate_session(&self, destination: Destination, session: &SessionStore) -> GateDecision {
        self.evaluate(destination, session.is_authenticated())
    }
}
