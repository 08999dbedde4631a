#![no_main]
use iox_engine::template::{parse_template, MissingVariablePolicy, PlaceholderRenderer, Segment};
use iox_engine::{TemplateContext, TemplateRenderer};
use libfuzzer_sys::fuzz_target;
use serde_json::json;

fuzz_target!(|data: &[u8]| {
    let Ok(template) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing must never panic; it either yields segments or a template error
    let parsed = parse_template(template);

    let context = TemplateContext::new()
        .with_namespace("message", json!({"subject": "s", "body": "b", "n": 1}))
        .with_namespace("header", json!({"directory": "d"}));

    let lenient = PlaceholderRenderer::new(MissingVariablePolicy::Empty);
    let rendered = lenient.render(template, &context);

    // Syntax errors are independent of the missing-variable policy
    assert_eq!(parsed.is_ok(), rendered.is_ok());

    if let (Ok(segments), Ok(output)) = (parsed, rendered) {
        // Rendering is deterministic
        assert_eq!(lenient.render(template, &context).ok(), Some(output.clone()));

        // Without variables the output is the literal text with `$$` collapsed
        if !segments.iter().any(|s| matches!(s, Segment::Variable(_))) {
            assert!(output.len() <= template.len());
        }
    }
});
