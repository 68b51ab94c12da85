//! Session state machine (spec §4.3). Initial state is `Disconnected`,
//! terminal state is `Stopped`; `Stopped -> Resolving` is the one explicit
//! restart transition that breaks monotonicity.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NegotiationStage {
    Hello,
    ErrorMap,
    Sasl,
    SelectBucket,
    GetConfig,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SessionState {
    Disconnected,
    Resolving,
    Connecting,
    Negotiating(NegotiationStage),
    Ready,
    Stopped,
}

impl SessionState {
    /// Mirrors the transition table in spec §4.3: every state can restate
    /// itself, negotiation advances strictly through its stages, and any
    /// state can fall through to `Stopped` on an io-error.
    pub fn can_transition_to(self, target: SessionState) -> bool {
        use NegotiationStage::*;
        use SessionState::*;
        if target == self {
            return true;
        }
        if target == Stopped {
            return true;
        }
        matches!(
            (self, target),
            (Disconnected, Resolving)
                | (Resolving, Connecting)
                | (Connecting, Negotiating(Hello))
                | (Negotiating(Hello), Negotiating(ErrorMap))
                | (Negotiating(ErrorMap), Negotiating(Sasl))
                | (Negotiating(Sasl), Negotiating(SelectBucket))
                | (Negotiating(Sasl), Negotiating(GetConfig))
                | (Negotiating(SelectBucket), Negotiating(GetConfig))
                | (Negotiating(GetConfig), Ready)
                | (Stopped, Resolving)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped)
    }

    pub fn accepts_user_commands(self) -> bool {
        matches!(self, SessionState::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationStage::*;
    use SessionState::*;

    #[test]
    fn negotiation_advances_in_order() {
        assert!(Connecting.can_transition_to(Negotiating(Hello)));
        assert!(Negotiating(Hello).can_transition_to(Negotiating(ErrorMap)));
        assert!(!Negotiating(Hello).can_transition_to(Negotiating(Sasl)));
    }

    #[test]
    fn sasl_branches_on_bucket_binding() {
        assert!(Negotiating(Sasl).can_transition_to(Negotiating(SelectBucket)));
        assert!(Negotiating(Sasl).can_transition_to(Negotiating(GetConfig)));
    }

    #[test]
    fn any_state_can_fall_to_stopped() {
        assert!(Ready.can_transition_to(Stopped));
        assert!(Negotiating(Hello).can_transition_to(Stopped));
    }

    #[test]
    fn stopped_restarts_via_resolving_only() {
        assert!(Stopped.can_transition_to(Resolving));
        assert!(!Stopped.can_transition_to(Connecting));
    }

    #[test]
    fn only_ready_accepts_user_commands() {
        assert!(Ready.accepts_user_commands());
        assert!(!Negotiating(GetConfig).accepts_user_commands());
    }
}
