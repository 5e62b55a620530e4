use proptest::prelude::*;
use sdk::errors::{EngineError, PilotErrorExt};
use sdk::step::single;
use sdk::{codes, Step, Tool};

proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::PathCanonicalization(std::path::PathBuf::from(&error_str), error_str.clone()),
            EngineError::Backend(error_str.clone()),
            EngineError::BackendTimeout,
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
        }
    }

    #[test]
    fn test_tool_names_resolve_case_and_separator_insensitively(
        idx in 0usize..Tool::ALL.len(),
        upper in any::<bool>(),
        dashed in any::<bool>(),
    ) {
        let tool = Tool::ALL[idx];
        let mut name = tool.as_str().to_string();
        if upper {
            name = name.to_uppercase();
        }
        if dashed {
            name = name.replace('_', "-");
        }
        prop_assert_eq!(Tool::from_name(&name), Some(tool));
    }

    #[test]
    fn test_step_serialization_round_trip(
        idx in 0usize..Tool::ALL.len(),
        path in "[a-z/]{1,20}\\.[a-z]{1,3}",
        reasoning in "\\PC{0,40}",
    ) {
        let step = Step::for_tool(Tool::ALL[idx], single("path", path.as_str()))
            .with_reasoning(reasoning);
        let json = serde_json::to_string(&step).unwrap();
        let back: Step = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, step);
    }

    #[test]
    fn test_formatted_codes_are_recovered(detail in "[ -~]{0,60}") {
        for code in [codes::LOOP_DETECTED, codes::MODEL_ERROR, codes::UNKNOWN_AGENT] {
            let error = codes::format(code, &detail);
            prop_assert_eq!(codes::code_of(&error), Some(code));
        }
    }
}
