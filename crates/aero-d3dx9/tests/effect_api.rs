use aero_d3dx9::d3d9::{D3DRS_POINTSIZE, D3DRS_ZENABLE};
use aero_d3dx9::preshader::Opcode;
use aero_d3dx9::test_utils::{
    parameter_path_data, ty, usage, EffectBuilder, PassSpec, ProgramBuilder, Reg, StateSpec,
    TechniqueSpec, TypeSpec, ValueSpec,
};
use aero_d3dx9::{
    Effect, EffectConfig, EffectError, EffectPool, ParameterClass, ParameterFlags, ParameterType,
    ParseError, StateClass,
};
use anyhow::Context;
use pretty_assertions::assert_eq;

fn blob() -> Vec<u8> {
    let mut b = EffectBuilder::new();
    let author = b.add_object();
    b.string(author, "aero");

    b.annotated_parameter(
        TypeSpec::scalar(ty::FLOAT, "g"),
        ValueSpec::floats(&[1.5]),
        vec![(TypeSpec::scalar(ty::INT, "h").array(3), ValueSpec::ints(&[4, 5, 6]))],
    )
    .parameter(
        TypeSpec::vector(ty::FLOAT, "light_pos", 4).with_semantic("Position"),
        ValueSpec::floats(&[1.0, 2.0, 3.0, 1.0]),
    )
    .parameter(
        TypeSpec::structure(
            "material",
            vec![
                TypeSpec::vector(ty::FLOAT, "color", 4),
                TypeSpec::scalar(ty::FLOAT, "shine"),
            ],
        )
        .array(2),
        ValueSpec::floats(&[0.0; 10]),
    )
    .parameter(TypeSpec::scalar(ty::FLOAT, "size"), ValueSpec::floats(&[2.0]));

    b.technique(
        TechniqueSpec::new("main")
            .annotation(TypeSpec::object(ty::STRING, "author"), ValueSpec::object(author))
            .pass(
                PassSpec::new("first")
                    .annotation(TypeSpec::scalar(ty::INT, "order"), ValueSpec::ints(&[1]))
                    .state(StateSpec::float(StateClass::RenderState, D3DRS_POINTSIZE, 0, 0.0)),
            )
            .pass(
                PassSpec::new("second")
                    .state(StateSpec::dword(StateClass::RenderState, D3DRS_ZENABLE, 0, 1)),
            ),
    )
    .technique(TechniqueSpec::new("fallback").pass(PassSpec::new("only")));
    b.pass_resource(0, 0, 0, usage::PARAMETER, &parameter_path_data("size"));
    b.build()
}

#[test]
fn describes_parameters_and_techniques() -> anyhow::Result<()> {
    let e = Effect::new(&blob())?;
    let desc = e.desc();
    assert_eq!((desc.parameters, desc.techniques), (4, 2));

    let material = e.parameter_by_name(None, "material").context("material")?;
    let d = e.parameter_desc(material)?;
    assert_eq!(d.class, ParameterClass::Struct);
    assert_eq!(d.elements, 2);
    assert_eq!(d.struct_members, 2);
    assert_eq!(d.bytes, 40);

    let shine = e
        .parameter_by_name(None, "material[1].shine")
        .context("material[1].shine")?;
    let element = e.parameter_element(material, 1).context("element")?;
    assert_eq!(e.parameter(Some(element), 1), Some(shine));
    let d = e.parameter_desc(shine)?;
    assert_eq!((d.name, d.ty, d.bytes), (Some("shine"), ParameterType::Float, 4));

    let pos = e.parameter_by_semantic(None, Some("POSITION"));
    assert_eq!(pos, e.parameter(None, 1));
    assert_eq!(e.parameter(None, 4), None);
    assert_eq!(e.parameter_by_name(None, "material[2]"), None);
    assert_eq!(e.parameter_by_name(None, "material[x]"), None);
    assert_eq!(e.parameter_by_name(None, "nope"), None);

    let main = e.technique_by_name("main").context("main")?;
    assert_eq!(e.current_technique(), Some(main));
    let td = e.technique_desc(main)?;
    assert_eq!((td.name, td.passes, td.annotations), (Some("main"), 2, 1));
    let second = e.pass_by_name(main, "second").context("second")?;
    assert_eq!(e.pass(main, 1), Some(second));
    assert_eq!(e.pass(main, 2), None);
    assert_eq!(e.pass_desc(second)?.name, Some("second"));
    assert_eq!(e.technique_by_name("missing"), None);
    Ok(())
}

#[test]
fn annotation_paths_resolve_to_the_same_handle() -> anyhow::Result<()> {
    let e = Effect::new(&blob())?;
    let g = e.parameter_by_name(None, "g").context("g")?;

    let via_path = e.parameter_by_name(None, "g@h[0]");
    let h = e.parameter_by_name(None, "g@h").context("g@h")?;
    assert_eq!(via_path, e.parameter_element(h, 0));
    assert_eq!(via_path, e.annotation_by_name(g, "h[0]"));
    assert_eq!(e.annotation(g, 0), Some(h));
    assert!(e.parameter_desc(h)?.flags.contains(ParameterFlags::ANNOTATION));

    let mut values = [0; 3];
    e.get_int_array(h, &mut values)?;
    assert_eq!(values, [4, 5, 6]);

    let main = e.technique(0).context("technique")?;
    let author = e.annotation_by_name(main, "author").context("author")?;
    assert_eq!(e.get_string(author)?.as_deref(), Some("aero"));

    let first = e.pass(main, 0).context("pass")?;
    let order = e.annotation(first, 0).context("order")?;
    assert_eq!(e.get_int(order)?, 1);
    assert_eq!(e.annotation(first, 1), None);
    Ok(())
}

#[test]
fn rejects_malformed_blobs() {
    let mut data = blob();
    data[0] ^= 0xFF;
    assert!(matches!(
        Effect::new(&data),
        Err(EffectError::Parse(ParseError::InvalidFormat(_)))
    ));

    let data = blob();
    assert!(matches!(
        Effect::new(&data[..data.len() / 2]),
        Err(EffectError::Parse(_))
    ));

    let mut b = EffectBuilder::new();
    b.parameter(TypeSpec::scalar(ty::FLOAT, "a"), ValueSpec::floats(&[0.0]))
        .technique(TechniqueSpec::new("t").pass(
            PassSpec::new("p").state(StateSpec::float(StateClass::RenderState, D3DRS_POINTSIZE, 0, 0.0)),
        ))
        .pass_resource(0, 0, 0, usage::PARAMETER, &parameter_path_data("missing"));
    assert!(matches!(
        Effect::new(&b.build()),
        Err(EffectError::Parse(ParseError::InvalidFormat(_)))
    ));

    let mut b = EffectBuilder::new();
    b.technique(TechniqueSpec::new("t").pass(PassSpec::new("p")))
        .pass_resource(0, 0, 3, usage::PARAMETER, &parameter_path_data("a"));
    assert!(matches!(
        Effect::new(&b.build()),
        Err(EffectError::Parse(ParseError::InvalidFormat(_)))
    ));
}

#[test]
fn skipped_constant_cannot_feed_an_expression() {
    let mut b = EffectBuilder::new();
    b.parameter(TypeSpec::scalar(ty::FLOAT, "scale"), ValueSpec::floats(&[1.0]))
        .technique(TechniqueSpec::new("t").pass(
            PassSpec::new("p").state(StateSpec::float(StateClass::RenderState, D3DRS_POINTSIZE, 0, 0.0)),
        ));
    let program = ProgramBuilder::new()
        .input_float4("scale", 0, 1)
        .op(Opcode::Mov, 1, &[Reg::input(0)], Reg::out(0))
        .build();
    b.pass_resource(0, 0, 0, usage::CODE, &program);
    let data = b.build();

    assert!(Effect::new(&data).is_ok());
    let err = Effect::with_options(&data, None, EffectConfig::with_skip_constants("other; scale"))
        .unwrap_err();
    assert!(matches!(err, EffectError::InvalidCall(_)), "{err:?}");
}

#[test]
fn pool_shares_matching_parameters() -> anyhow::Result<()> {
    let mut a = EffectBuilder::new();
    a.shared_parameter(TypeSpec::scalar(ty::FLOAT, "time"), ValueSpec::floats(&[1.0]))
        .shared_parameter(TypeSpec::scalar(ty::FLOAT, "mismatch"), ValueSpec::floats(&[0.0]))
        .parameter(TypeSpec::scalar(ty::FLOAT, "local"), ValueSpec::floats(&[0.0]));
    let mut b = EffectBuilder::new();
    b.shared_parameter(TypeSpec::scalar(ty::FLOAT, "time"), ValueSpec::floats(&[5.0]))
        .shared_parameter(
            TypeSpec::vector(ty::FLOAT, "mismatch", 4),
            ValueSpec::floats(&[7.0, 0.0, 0.0, 0.0]),
        )
        .parameter(TypeSpec::scalar(ty::FLOAT, "local"), ValueSpec::floats(&[0.0]));

    let pool = EffectPool::new();
    let mut first = Effect::with_options(&a.build(), Some(&pool), EffectConfig::default())?;
    let mut second = Effect::with_options(&b.build(), Some(&pool), EffectConfig::default())?;
    assert_eq!(pool.len(), 2);
    assert!(second.pool().is_some());

    let time_a = first.parameter_by_name(None, "time").context("time")?;
    let time_b = second.parameter_by_name(None, "time").context("time")?;
    assert_eq!(second.get_float(time_b)?, 1.0);
    first.set_float(time_a, 3.0)?;
    assert_eq!(second.get_float(time_b)?, 3.0);
    second.set_float(time_b, 4.0)?;
    assert_eq!(first.get_float(time_a)?, 4.0);

    let mismatch_a = first.parameter_by_name(None, "mismatch").context("mismatch")?;
    let mismatch_b = second.parameter_by_name(None, "mismatch").context("mismatch")?;
    first.set_float(mismatch_a, 9.0)?;
    assert_eq!(second.get_vector(mismatch_b)?, [7.0, 0.0, 0.0, 0.0]);

    let local_a = first.parameter_by_name(None, "local").context("local")?;
    let local_b = second.parameter_by_name(None, "local").context("local")?;
    first.set_float(local_a, 2.0)?;
    assert_eq!(second.get_float(local_b)?, 0.0);
    Ok(())
}

#[test]
fn clone_copies_values_and_technique() -> anyhow::Result<()> {
    let mut e = Effect::new(&blob())?;
    let size = e.parameter_by_name(None, "size").context("size")?;
    e.set_float(size, 8.0)?;
    let fallback = e.technique_by_name("fallback").context("fallback")?;
    e.set_technique(fallback)?;

    let mut clone = e.clone_effect()?;
    assert_eq!(clone.get_float(size)?, 8.0);
    assert_eq!(clone.current_technique(), Some(fallback));

    clone.set_float(size, 1.0)?;
    assert_eq!(e.get_float(size)?, 8.0);

    // Creation-time values stay those of the blob.
    clone.reset_value(size)?;
    assert_eq!(clone.get_float(size)?, 2.0);
    Ok(())
}

#[test]
fn parameter_blocks_replay_recorded_values() -> anyhow::Result<()> {
    let mut e = Effect::new(&blob())?;
    let size = e.parameter_by_name(None, "size").context("size")?;
    let pos = e.parameter_by_name(None, "light_pos").context("light_pos")?;
    let g = e.parameter_by_name(None, "g").context("g")?;

    assert!(matches!(e.end_parameter_block(), Err(EffectError::InvalidCall(_))));
    e.begin_parameter_block()?;
    assert!(matches!(e.begin_parameter_block(), Err(EffectError::InvalidCall(_))));
    e.set_float(size, 3.0)?;
    e.set_float(size, 5.0)?;
    e.set_vector(pos, &[0.0, 1.0, 0.0, 1.0])?;
    let block = e.end_parameter_block()?;

    e.set_float(size, 9.0)?;
    e.set_vector(pos, &[9.0; 4])?;
    e.set_float(g, 9.0)?;
    e.apply_parameter_block(block)?;
    assert_eq!(e.get_float(size)?, 5.0);
    assert_eq!(e.get_vector(pos)?, [0.0, 1.0, 0.0, 1.0]);
    assert_eq!(e.get_float(g)?, 9.0);

    e.delete_parameter_block(block)?;
    assert!(matches!(e.delete_parameter_block(block), Err(EffectError::InvalidCall(_))));
    assert!(matches!(e.apply_parameter_block(block), Err(EffectError::InvalidCall(_))));
    Ok(())
}

#[test]
fn technique_selection_validates_handles() -> anyhow::Result<()> {
    let mut other = EffectBuilder::new();
    other
        .technique(TechniqueSpec::new("a"))
        .technique(TechniqueSpec::new("b"))
        .technique(TechniqueSpec::new("c"));
    let other = Effect::new(&other.build())?;
    let foreign = other.technique(2).context("technique")?;

    let mut e = Effect::new(&blob())?;
    assert!(matches!(e.set_technique(foreign), Err(EffectError::InvalidCall(_))));
    assert!(matches!(e.technique_desc(foreign), Err(EffectError::InvalidCall(_))));
    assert_eq!(e.current_technique(), e.technique(0));

    let empty = Effect::new(&EffectBuilder::new().build())?;
    assert_eq!(empty.current_technique(), None);
    Ok(())
}
