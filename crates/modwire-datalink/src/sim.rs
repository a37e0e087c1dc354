use crate::{ModbusService, ServiceError};
use modwire_core::pdu::{BitStatus, ExceptionCode, RegisterData, Request, Response};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

const ILLEGAL_ADDRESS: ServiceError = ServiceError::Exception(ExceptionCode::IllegalDataAddress);

/// One contiguous Modbus address space starting at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointTable<T> {
    points: Vec<T>,
}

impl<T: Copy + Default> PointTable<T> {
    pub fn with_len(len: usize) -> Self {
        Self {
            points: vec![T::default(); len],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, address: u16) -> Option<T> {
        self.points.get(usize::from(address)).copied()
    }

    pub fn store(&mut self, address: u16, value: T) -> Result<(), ServiceError> {
        let cell = self
            .points
            .get_mut(usize::from(address))
            .ok_or(ILLEGAL_ADDRESS)?;
        *cell = value;
        Ok(())
    }

    /// Bounds-check the whole block before touching anything, so a write that
    /// runs off the end leaves the table unchanged.
    fn store_block(
        &mut self,
        start: u16,
        values: impl ExactSizeIterator<Item = T>,
    ) -> Result<(), ServiceError> {
        let span = self.span(start, values.len())?;
        for (cell, value) in self.points[span].iter_mut().zip(values) {
            *cell = value;
        }
        Ok(())
    }

    fn block(&self, start: u16, quantity: u16) -> Result<&[T], ServiceError> {
        let span = self.span(start, usize::from(quantity))?;
        Ok(&self.points[span])
    }

    fn span(&self, start: u16, count: usize) -> Result<Range<usize>, ServiceError> {
        let first = usize::from(start);
        match first.checked_add(count) {
            Some(end) if count > 0 && end <= self.points.len() => Ok(first..end),
            _ => Err(ILLEGAL_ADDRESS),
        }
    }
}

/// Contents of the four point spaces of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceImage {
    pub coils: PointTable<bool>,
    pub discrete_inputs: PointTable<bool>,
    pub holding_registers: PointTable<u16>,
    pub input_registers: PointTable<u16>,
}

impl DeviceImage {
    pub fn new(coils: usize, discrete_inputs: usize, holding: usize, input: usize) -> Self {
        Self {
            coils: PointTable::with_len(coils),
            discrete_inputs: PointTable::with_len(discrete_inputs),
            holding_registers: PointTable::with_len(holding),
            input_registers: PointTable::with_len(input),
        }
    }

    fn read_bits(table: &PointTable<bool>, start: u16, quantity: u16) -> Result<BitStatus, ServiceError> {
        BitStatus::from_bits(table.block(start, quantity)?)
            .map_err(|_| ServiceError::Exception(ExceptionCode::IllegalDataValue))
    }

    fn read_words(
        table: &PointTable<u16>,
        start: u16,
        quantity: u16,
    ) -> Result<RegisterData, ServiceError> {
        RegisterData::new(table.block(start, quantity)?.to_vec())
            .map_err(|_| ServiceError::Exception(ExceptionCode::IllegalDataValue))
    }

    fn apply(&mut self, request: &Request) -> Result<Response, ServiceError> {
        match request {
            Request::ReadCoils(range) => {
                Self::read_bits(&self.coils, range.start_address(), range.quantity())
                    .map(Response::ReadCoils)
            }
            Request::ReadDiscreteInputs(range) => {
                Self::read_bits(&self.discrete_inputs, range.start_address(), range.quantity())
                    .map(Response::ReadDiscreteInputs)
            }
            Request::ReadHoldingRegisters(range) => {
                Self::read_words(&self.holding_registers, range.start_address(), range.quantity())
                    .map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(range) => {
                Self::read_words(&self.input_registers, range.start_address(), range.quantity())
                    .map(Response::ReadInputRegisters)
            }
            Request::WriteSingleCoil(body) => {
                self.coils.store(body.address(), body.value())?;
                acknowledge(request)
            }
            Request::WriteSingleRegister(body) => {
                self.holding_registers.store(body.address(), body.value())?;
                acknowledge(request)
            }
            Request::WriteMultipleCoils(body) => {
                self.coils
                    .store_block(body.start_address(), body.values().into_iter())?;
                acknowledge(request)
            }
            Request::WriteMultipleRegisters(body) => {
                self.holding_registers
                    .store_block(body.start_address(), body.values().iter().copied())?;
                acknowledge(request)
            }
        }
    }
}

fn acknowledge(request: &Request) -> Result<Response, ServiceError> {
    Response::from_request(request).ok_or(ServiceError::InvalidRequest("request has no echo"))
}

/// A device whose points live in memory. Out-of-range addresses answer with
/// `IllegalDataAddress`; every request sees the image atomically.
#[derive(Debug)]
pub struct InMemoryModbusService {
    image: Mutex<DeviceImage>,
}

impl InMemoryModbusService {
    pub fn new(coils: usize, discrete_inputs: usize, holding: usize, input: usize) -> Self {
        Self::with_image(DeviceImage::new(coils, discrete_inputs, holding, input))
    }

    pub fn with_image(image: DeviceImage) -> Self {
        Self {
            image: Mutex::new(image),
        }
    }

    fn image(&self) -> MutexGuard<'_, DeviceImage> {
        self.image.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> DeviceImage {
        self.image().clone()
    }

    pub fn set_coil(&self, address: u16, value: bool) -> Result<(), ServiceError> {
        self.image().coils.store(address, value)
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) -> Result<(), ServiceError> {
        self.image().discrete_inputs.store(address, value)
    }

    pub fn set_holding_register(&self, address: u16, value: u16) -> Result<(), ServiceError> {
        self.image().holding_registers.store(address, value)
    }

    pub fn set_input_register(&self, address: u16, value: u16) -> Result<(), ServiceError> {
        self.image().input_registers.store(address, value)
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.image().coils.point(address)
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.image().holding_registers.point(address)
    }
}

impl ModbusService for InMemoryModbusService {
    fn handle(&self, _unit_id: u8, request: &Request) -> Result<Response, ServiceError> {
        self.image().apply(request)
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceImage, InMemoryModbusService, PointTable};
    use crate::{ModbusService, ServiceError};
    use modwire_core::pdu::{ExceptionCode, Request, Response};

    #[test]
    fn register_reads_reflect_writes() {
        let service = InMemoryModbusService::with_image(DeviceImage::new(16, 16, 16, 16));
        service.set_holding_register(0, 42).unwrap();

        let read = Request::read_holding_registers(0, 1).unwrap();
        let Response::ReadHoldingRegisters(data) = service.handle(1, &read).unwrap() else {
            panic!("expected a register payload");
        };
        assert_eq!(data.register(0), Some(42));

        let write = Request::write_single_register(1, 0x1234).unwrap();
        assert_eq!(
            service.handle(1, &write).unwrap(),
            Response::from_request(&write).unwrap()
        );
        assert_eq!(service.holding_register(1), Some(0x1234));
    }

    #[test]
    fn coil_block_write_then_read_back() {
        let service = InMemoryModbusService::new(16, 0, 0, 0);
        let coils = Request::write_multiple_coils(2, &[true, false, true]).unwrap();
        service.handle(1, &coils).unwrap();
        assert_eq!(service.coil(2), Some(true));
        assert_eq!(service.coil(3), Some(false));
        assert_eq!(service.coil(4), Some(true));

        let read = Request::read_coils(0, 5).unwrap();
        let Response::ReadCoils(status) = service.handle(1, &read).unwrap() else {
            panic!("expected a coil payload");
        };
        assert_eq!(status.bits(5), [false, false, true, false, true]);
    }

    #[test]
    fn out_of_range_access_is_an_exception() {
        let service = InMemoryModbusService::new(4, 4, 4, 4);
        let request = Request::read_input_registers(3, 2).unwrap();
        assert!(matches!(
            service.handle(1, &request),
            Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress))
        ));

        let write = Request::write_multiple_registers(2, &[1, 2, 3]).unwrap();
        assert!(service.handle(1, &write).is_err());
        assert_eq!(service.snapshot().holding_registers.point(2), Some(0));
    }

    #[test]
    fn table_span_rejects_end_overflow() {
        let mut table = PointTable::<u16>::with_len(4);
        assert!(table.store(4, 1).is_err());
        assert!(table.block(0xFFFF, 2).is_err());
        assert_eq!(table.block(1, 3).unwrap(), &[0, 0, 0]);
    }
}
