use candle_core::{DType, Device, Tensor};
use candle_util::candle_epoch_hooks::*;
use candle_util::candle_vcca::Vcca;
use candle_util::candle_vcca_config::VccaConfig;
use candle_util::candle_vcca_error::VccaError;
use candle_util::candle_vcca_inference::ModelState;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn paired_data(n: usize, dev: &Device) -> anyhow::Result<(Tensor, Tensor)> {
    let z = Tensor::randn(0f32, 1., (n, 4), dev)?;
    let wx = Tensor::randn(0f32, 1., (4, 20), dev)?;
    let wy = Tensor::randn(0f32, 1., (4, 15), dev)?;
    let x = (z.matmul(&wx)? + Tensor::randn(0f32, 0.1, (n, 20), dev)?)?;
    let y = (z.matmul(&wy)? + Tensor::randn(0f32, 0.1, (n, 15), dev)?)?;
    Ok((x, y))
}

fn small_model(dir: &std::path::Path) -> anyhow::Result<Vcca> {
    let mut config = VccaConfig::vcca(20, 15, &[], 0)
        .with_schedule(&[16, 8, 4])?
        .with_path(dir);
    config.show_progress = false;
    Ok(Vcca::new(config, Device::Cpu)?)
}

#[test]
fn one_epoch_end_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (x, y) = paired_data(50, &Device::Cpu)?;

    let mut model = small_model(dir.path())?;
    assert_eq!(model.state(), ModelState::Unbuilt);
    model.build()?;
    model.compile()?;
    assert_eq!(model.state(), ModelState::Compiled);

    let history = model.train(&x, &y, 10, 1)?;
    assert_eq!(history.len(), 1);
    assert!(history.loss[0].is_finite());
    assert_eq!(model.state(), ModelState::Trained);

    let z = model.integrate(&x)?;
    assert_eq!(z.dims(), &[50, 4]);

    // deterministic at inference
    let z2 = model.integrate(&x)?;
    assert_eq!(z.to_vec2::<f32>()?, z2.to_vec2::<f32>()?);

    // side files
    assert!(dir.path().join(CHECKPOINT_FILE).exists());
    assert!(dir.path().join("config.json").exists());
    assert!(dir.path().join("logs").join("loss.tsv").exists());
    Ok(())
}

#[test]
fn reconstruction_shapes_follow_inputs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (x, y) = paired_data(30, &Device::Cpu)?;

    let mut model = small_model(dir.path())?;
    model.build()?;
    model.compile()?;
    model.train(&x, &y, 8, 3)?;

    let (x_hat, y_hat) = model.get_output(&x, None::<&Tensor>)?;
    assert_eq!(x_hat.dims(), &[30, 20]);
    assert_eq!(y_hat.dims(), &[30, 15]);

    // all-zero input still decodes to finite values
    let zeros = Tensor::zeros((5, 20), DType::F32, &Device::Cpu)?;
    let (x0, y0) = model.get_output(&zeros, None::<&Tensor>)?;
    assert_eq!(x0.dims(), &[5, 20]);
    assert_eq!(y0.dims(), &[5, 15]);
    for v in x0.flatten_all()?.to_vec1::<f32>()? {
        assert!(v.is_finite());
    }
    for v in y0.flatten_all()?.to_vec1::<f32>()? {
        assert!(v.is_finite());
    }

    // integrate does not depend on how many rows are asked for
    assert_eq!(model.integrate(&x.narrow(0, 0, 3)?)?.dims(), &[3, 4]);

    let composed = model.integrate_compose(&x, None::<&Tensor>)?;
    assert_eq!(composed.shared.dims(), &[30, 4]);
    assert!(composed.private_x.is_none());
    Ok(())
}

#[test]
fn mismatched_rows_fail_before_training() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dev = Device::Cpu;
    let x = Tensor::randn(0f32, 1., (51, 20), &dev)?;
    let y = Tensor::randn(0f32, 1., (50, 15), &dev)?;

    // rows are checked even before the state
    let mut model = small_model(dir.path())?;
    assert!(matches!(
        model.train(&x, &y, 10, 1),
        Err(VccaError::ShapeMismatch {
            expected: 51,
            actual: 50,
            ..
        })
    ));

    model.build()?;
    model.compile()?;
    assert!(matches!(
        model.train(&x, &y, 10, 1),
        Err(VccaError::ShapeMismatch { .. })
    ));
    assert_eq!(model.state(), ModelState::Compiled);
    assert!(!dir.path().join(CHECKPOINT_FILE).exists());

    // wrong feature count
    let y = Tensor::randn(0f32, 1., (51, 14), &dev)?;
    assert!(matches!(
        model.train(&x, &y, 10, 1),
        Err(VccaError::ShapeMismatch {
            expected: 15,
            actual: 14,
            ..
        })
    ));
    Ok(())
}

#[test]
fn operations_out_of_order_name_the_state() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (x, y) = paired_data(20, &Device::Cpu)?;
    let mut model = small_model(dir.path())?;

    match model.integrate(&x) {
        Err(VccaError::State {
            operation,
            required,
            actual,
        }) => {
            assert_eq!(operation, "integrate");
            assert_eq!(required, ModelState::Trained);
            assert_eq!(actual, ModelState::Unbuilt);
        }
        other => anyhow::bail!("unexpected {:?}", other.map(|t| t.dims().to_vec())),
    }

    assert!(matches!(model.compile(), Err(VccaError::State { .. })));
    model.build()?;
    assert!(matches!(model.build(), Err(VccaError::State { .. })));
    assert!(matches!(
        model.train(&x, &y, 5, 1),
        Err(VccaError::State {
            required: ModelState::Compiled,
            actual: ModelState::Built,
            ..
        })
    ));
    assert!(matches!(
        model.get_output(&x, None::<&Tensor>),
        Err(VccaError::State { .. })
    ));
    model.compile()?;
    assert!(matches!(model.integrate(&x), Err(VccaError::State { .. })));
    Ok(())
}

#[test]
fn bad_schedules_are_configuration_errors() {
    assert!(matches!(
        VccaConfig::vcca(20, 15, &[], 0).with_schedule(&[4]),
        Err(VccaError::Configuration(_))
    ));
    let config = VccaConfig::vcca(20, 15, &[], 4);
    assert!(matches!(
        Vcca::new(config, Device::Cpu),
        Err(VccaError::Configuration(_))
    ));
}

#[test]
fn empty_inputs_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (x, y) = paired_data(10, &Device::Cpu)?;
    let mut model = small_model(dir.path())?;
    model.build()?;
    model.compile()?;
    assert!(matches!(
        model.train(&x, &y, 0, 1),
        Err(VccaError::EmptyInput(_))
    ));
    let x0 = Tensor::zeros((0, 20), DType::F32, &Device::Cpu)?;
    let y0 = Tensor::zeros((0, 15), DType::F32, &Device::Cpu)?;
    assert!(matches!(
        model.train(&x0, &y0, 5, 1),
        Err(VccaError::EmptyInput(_))
    ));
    Ok(())
}

/// records what it sees
struct Recorder {
    seen: Rc<RefCell<Vec<(usize, f32, Option<f32>)>>>,
    starts: Rc<Cell<usize>>,
    stop_at: Option<usize>,
}

impl EpochHook for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn on_train_begin(&mut self) {
        self.starts.set(self.starts.get() + 1);
        self.seen.borrow_mut().clear();
    }

    fn on_epoch_end(&mut self, state: &EpochState) -> anyhow::Result<HookSignal> {
        self.seen
            .borrow_mut()
            .push((state.epoch, state.loss, state.val_loss));
        if Some(state.epoch) == self.stop_at {
            return Ok(HookSignal::Stop);
        }
        Ok(HookSignal::Continue)
    }
}

#[test]
fn hooks_run_in_order_and_can_stop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (x, y) = paired_data(40, &Device::Cpu)?;

    let mut config = VccaConfig::vcca(20, 15, &[12], 3).with_path(dir.path());
    config.show_progress = false;
    config.validation_split = 0.25;
    let mut model = Vcca::new(config, Device::Cpu)?;

    let seen = Rc::new(RefCell::new(vec![]));
    let starts = Rc::new(Cell::new(0));
    model.push_hook(Box::new(Recorder {
        seen: seen.clone(),
        starts: starts.clone(),
        stop_at: Some(2),
    }));
    model.build()?;
    assert_eq!(
        model.hook_names(),
        vec![
            "checkpoint",
            "reduce_lr_on_plateau",
            "early_stopping",
            "loss_log",
            "recorder"
        ]
    );
    model.compile()?;

    let history = model.train(&x, &y, 7, 10)?;
    assert_eq!(history.len(), 3);
    assert_eq!(history.val_loss.len(), 3);

    {
        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        for (e, (epoch, loss, val)) in seen.iter().enumerate() {
            assert_eq!(*epoch, e);
            assert_eq!(*loss, history.loss[e]);
            assert!(val.is_some());
        }
    }

    assert_eq!(starts.get(), 1);

    // a second call keeps training the same weights, and every hook
    // starts over: epochs count from zero and nothing stops early
    let again = model.train(&x, &y, 7, 2)?;
    assert_eq!(again.len(), 2);
    assert_eq!(starts.get(), 2);
    let epochs = seen.borrow().iter().map(|s| s.0).collect::<Vec<_>>();
    assert_eq!(epochs, vec![0, 1]);
    Ok(())
}

#[test]
fn weights_round_trip_through_checkpoint() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (x, y) = paired_data(20, &Device::Cpu)?;

    let mut model = small_model(dir.path())?;
    model.build()?;
    model.compile()?;
    model.train(&x, &y, 5, 2)?;
    let z = model.integrate(&x)?.to_vec2::<f32>()?;

    let other_dir = tempfile::tempdir()?;
    let mut restored = small_model(other_dir.path())?;
    restored.build()?;
    restored.load_weights(&dir.path().join(CHECKPOINT_FILE))?;
    assert_eq!(restored.state(), ModelState::Trained);

    let z_restored = restored.integrate(&x)?.to_vec2::<f32>()?;
    for (a, b) in z.iter().flatten().zip(z_restored.iter().flatten()) {
        approx::assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn single_row_leftover_batch_keeps_embeddings_apart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (x, y) = paired_data(21, &Device::Cpu)?;

    let mut model = small_model(dir.path())?;
    model.build()?;
    model.compile()?;
    model.train(&x, &y, 10, 1)?;

    {
        let data = model
            .parameters()
            .data()
            .lock()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut nvar = 0;
        for (name, var) in data.iter() {
            if name.ends_with("running_var") {
                nvar += 1;
                let values = var.as_tensor().to_vec1::<f32>()?;
                assert!(values.iter().all(|v| v.is_finite()), "{}", name);
            }
        }
        assert!(nvar > 0);
    }

    let z = model.integrate(&x)?.to_vec2::<f32>()?;
    assert_eq!(z.len(), 21);
    for i in 1..z.len() {
        assert_ne!(z[0], z[i]);
    }
    Ok(())
}

#[test]
fn non_finite_loss_stops_training() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (x, y) = paired_data(20, &Device::Cpu)?;
    let mut values = x.flatten_all()?.to_vec1::<f32>()?;
    values[3 * 20 + 5] = f32::NAN;
    let x = Tensor::from_vec(values, (20, 20), &Device::Cpu)?;

    let mut model = small_model(dir.path())?;
    model.build()?;
    model.compile()?;
    assert!(matches!(
        model.train(&x, &y, 10, 3),
        Err(VccaError::NumericalInstability { epoch: 0, .. })
    ));
    assert_eq!(model.state(), ModelState::Compiled);
    Ok(())
}
