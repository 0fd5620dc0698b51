//! Protocol layer tests — identifiers, references, policies, states, errors, events.

#[cfg(test)]
mod tests {
    use orb_protocol::*;
    use serde_json::json;

    // ─────────────────────────────────────────────────────────────────────
    // Identifiers
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn adapter_id_from_routing_key() {
        let id = AdapterId::from_key(&[0, 0, 1, 2]).unwrap();
        assert_eq!(id, AdapterId(258));
        assert_eq!(id.to_key(), [0, 0, 1, 2]);
    }

    #[test]
    fn adapter_id_rejects_short_key() {
        assert!(AdapterId::from_key(&[1, 2, 3]).is_none());
        assert!(AdapterId::from_key(&[]).is_none());
    }

    #[test]
    fn object_id_display_printable() {
        let id = ObjectId::from("obj-42");
        assert_eq!(id.to_string(), "obj-42");
    }

    #[test]
    fn object_id_display_binary_as_hex() {
        let id = ObjectId::new(vec![0u8, 1, 255]);
        assert_eq!(id.to_string(), "0x0001ff");
    }

    #[test]
    fn object_id_serializes_as_hex() {
        let id = ObjectId::from("ab");
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("6162"));
        let back: ObjectId = serde_json::from_value(json!("6162")).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn object_id_rejects_bad_hex() {
        let res: Result<ObjectId, _> = serde_json::from_value(json!("zz"));
        assert!(res.is_err());
    }

    // ─────────────────────────────────────────────────────────────────────
    // References
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn template_builds_reference() {
        let mut template = ReferenceTemplate::new(
            7,
            "orb",
            AdapterId(3),
            vec!["RootPOA".into(), "child".into()],
            Lifespan::Persistent,
        );
        template.add_endpoint(Endpoint::new("localhost", 2809));
        template.add_endpoint(Endpoint::new("localhost", 2809));

        let r = template.make_reference(ObjectId::from("obj"), "IDL:demo/Echo:1.0");
        assert_eq!(r.adapter_id, AdapterId(3));
        assert_eq!(r.server_id, 7);
        assert_eq!(r.type_id, "IDL:demo/Echo:1.0");
        assert_eq!(r.endpoints.len(), 1);
        assert_eq!(r.to_string(), "3/obj (IDL:demo/Echo:1.0)");
    }

    #[test]
    fn transient_template_carries_incarnation() {
        let template = ReferenceTemplate::new(1, "orb", AdapterId(9), vec![], Lifespan::Transient)
            .with_incarnation(4);
        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(json["incarnation"], 4);
        assert_eq!(json["lifespan"], "transient");
        assert_eq!(json["adapterId"], 9);
    }

    #[test]
    fn persistent_template_omits_incarnation() {
        let template = ReferenceTemplate::new(1, "orb", AdapterId(9), vec![], Lifespan::Persistent);
        let json = serde_json::to_value(&template).unwrap();
        assert!(json.get("incarnation").is_none());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Policies
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn persistent_defaults() {
        let set = PolicySet::defaults_for(Lifespan::Persistent);
        assert_eq!(set.lifespan(), Some(Lifespan::Persistent));
        assert_eq!(set.id_assignment(), Some(IdAssignment::User));
        assert_eq!(set.servant_retention(), Some(ServantRetention::Retain));
        assert_eq!(
            set.request_processing(),
            Some(RequestProcessing::ActiveObjectMapOnly)
        );
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn transient_defaults_use_system_ids() {
        let set = PolicySet::defaults_for(Lifespan::Transient);
        assert_eq!(set.id_assignment(), Some(IdAssignment::System));
    }

    #[test]
    fn policy_set_replaces_same_type() {
        let mut set = PolicySet::defaults_for(Lifespan::Transient);
        set.set(Policy::ServantRetention(ServantRetention::NonRetain));
        assert_eq!(set.len(), 4);
        assert_eq!(
            set.get(PolicyType::ServantRetention),
            Some(Policy::ServantRetention(ServantRetention::NonRetain))
        );
    }

    #[test]
    fn policy_serialization_is_tagged() {
        let p = Policy::RequestProcessing(RequestProcessing::UseDefaultServant);
        assert_eq!(
            serde_json::to_value(p).unwrap(),
            json!({"type": "requestProcessing", "value": "useDefaultServant"})
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // States
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn destroyed_maps_to_non_existent() {
        assert_eq!(AdapterState::Destroyed.external(), ManagerState::NonExistent);
        assert_eq!(AdapterState::Destroyed.external().code(), 4);
    }

    #[test]
    fn manager_state_codes_roundtrip() {
        for code in 0..5 {
            let state = ManagerState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
        }
        assert!(ManagerState::from_code(5).is_none());
    }

    #[test]
    fn only_active_admits() {
        assert!(AdapterState::Active.admits_requests());
        assert!(!AdapterState::Holding.admits_requests());
        assert!(!AdapterState::Discarding.admits_requests());
        assert!(!AdapterState::Inactive.admits_requests());
        assert!(!AdapterState::Destroyed.admits_requests());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Errors
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn error_codes() {
        let destroyed = OrbError::Destroyed { adapter: AdapterId(1) };
        assert_eq!(destroyed.code(), ErrorCode::ObjectNotExist);
        assert!(!destroyed.is_fatal());

        let holding = OrbError::NotActive {
            adapter: AdapterId(1),
            state: AdapterState::Holding,
        };
        assert_eq!(holding.code(), ErrorCode::Transient);
        assert!(holding.code().is_retryable());

        let forwards = OrbError::TooManyForwards { limit: 10 };
        assert_eq!(forwards.code(), ErrorCode::ObjAdapter);
        assert!(forwards.is_fatal());
        assert!(!forwards.code().is_retryable());
    }

    #[test]
    fn error_code_names_roundtrip() {
        for code in [
            ErrorCode::ObjectNotExist,
            ErrorCode::Transient,
            ErrorCode::ObjAdapter,
            ErrorCode::BadOperation,
            ErrorCode::BadParam,
            ErrorCode::BadInvOrder,
            ErrorCode::Timeout,
            ErrorCode::Internal,
            ErrorCode::Unknown,
        ] {
            assert_eq!(ErrorCode::from_name(code.name()), Some(code));
        }
        assert_eq!(ErrorCode::from_name("NOPE"), None);
    }

    #[test]
    fn error_display() {
        let err = OrbError::ObjectNotFound {
            adapter: AdapterId(2),
            object_id: ObjectId::from("obj-1"),
        };
        assert_eq!(err.to_string(), "object obj-1 not found in adapter 2");

        let err = OrbError::NotActive {
            adapter: AdapterId(2),
            state: AdapterState::Holding,
        };
        assert_eq!(
            err.to_string(),
            "adapter 2 is not accepting requests (state: HOLDING)"
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn state_changed_event_serialization() {
        let event = AdapterEvent::StateChanged {
            adapter_id: AdapterId(5),
            state: ManagerState::Active,
        };
        assert_eq!(event.name(), Events::ADAPTER_STATE_CHANGED);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "adapter/stateChanged", "adapterId": 5, "state": "ACTIVE"})
        );
    }

    #[test]
    fn created_event_serialization() {
        let event = AdapterEvent::Created {
            adapter_id: AdapterId(5),
            name: "RootPOA".into(),
            lifespan: Lifespan::Persistent,
            incarnation: None,
        };
        assert_eq!(event.adapter_id(), AdapterId(5));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "adapter/created");
        assert_eq!(json["lifespan"], "persistent");
        assert!(json.get("incarnation").is_none());
    }
}
