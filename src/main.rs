#![recursion_limit = "256"]

use clap::Parser;
use image_classifier::cli::Cli;
use image_classifier::error::PipelineError;
use tracing_subscriber::filter::LevelFilter;

#[cfg(feature = "ndarray")]
mod ndarray {
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };
    use image_classifier::{cli::Cli, error::PipelineError, training};

    pub fn run(cli: &Cli) -> Result<(), PipelineError> {
        training::run::<Autodiff<NdArray>>(
            cli.training_config(),
            &cli.train_dir,
            &cli.test_dir,
            NdArrayDevice::Cpu,
        )
    }
}

#[cfg(feature = "tch-cpu")]
mod tch_cpu {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use image_classifier::{cli::Cli, error::PipelineError, training};

    pub fn run(cli: &Cli) -> Result<(), PipelineError> {
        training::run::<Autodiff<LibTorch>>(
            cli.training_config(),
            &cli.train_dir,
            &cli.test_dir,
            LibTorchDevice::Cpu,
        )
    }
}

#[cfg(feature = "tch-gpu")]
mod tch_gpu {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use image_classifier::{cli::Cli, error::PipelineError, training};

    pub fn run(cli: &Cli) -> Result<(), PipelineError> {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        training::run::<Autodiff<LibTorch>>(
            cli.training_config(),
            &cli.train_dir,
            &cli.test_dir,
            device,
        )
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };
    use image_classifier::{cli::Cli, error::PipelineError, training};

    pub fn run(cli: &Cli) -> Result<(), PipelineError> {
        training::run::<Autodiff<Wgpu>>(
            cli.training_config(),
            &cli.train_dir,
            &cli.test_dir,
            WgpuDevice::default(),
        )
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .init();

    let cli = Cli::parse();

    #[cfg(feature = "ndarray")]
    run_or_exit(ndarray::run(&cli));
    #[cfg(feature = "tch-cpu")]
    run_or_exit(tch_cpu::run(&cli));
    #[cfg(feature = "tch-gpu")]
    run_or_exit(tch_gpu::run(&cli));
    #[cfg(feature = "wgpu")]
    run_or_exit(wgpu::run(&cli));
}

fn run_or_exit(result: Result<(), PipelineError>) {
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
