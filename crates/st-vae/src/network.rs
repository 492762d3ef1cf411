// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_nn::{Activation, Linear, Module, Parameter, PureResult, Sequential, Tensor};

/// An encoder or decoder: any module plus the layer sizing that names it.
pub struct Network {
    sizing: Vec<usize>,
    module: Box<dyn Module>,
}

impl core::fmt::Debug for Network {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Network(sizing={:?})", self.sizing)
    }
}

impl Network {
    /// Wraps an arbitrary module. `sizing` only feeds the model identity.
    pub fn new<M>(sizing: Vec<usize>, module: M) -> Self
    where
        M: Module + 'static,
    {
        Self {
            sizing,
            module: Box::new(module),
        }
    }

    /// Fully-connected stack `input -> hidden... -> output` with `activation`
    /// after every hidden layer and a linear head.
    pub fn dense(
        input: usize,
        hidden: &[usize],
        output: usize,
        activation: Activation,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        let mut stack = Sequential::new();
        let mut width = input;
        for (index, &units) in hidden.iter().enumerate() {
            let layer_seed = seed.map(|s| s.wrapping_add(index as u64));
            stack.push(Linear::with_seed(format!("dense{index}"), width, units, layer_seed)?);
            stack.push(activation);
            width = units;
        }
        let head_seed = seed.map(|s| s.wrapping_add(hidden.len() as u64));
        stack.push(Linear::with_seed("projection", width, output, head_seed)?);
        Ok(Self {
            sizing: hidden.to_vec(),
            module: Box::new(stack),
        })
    }

    pub fn sizing(&self) -> &[usize] {
        &self.sizing
    }
}

impl Module for Network {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.module.forward(input)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.module.backward(input, grad_output)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.module.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.module.visit_parameters_mut(visitor)
    }
}
